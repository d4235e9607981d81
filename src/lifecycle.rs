//! Sync state machine.
//!
//! ```text
//! pending ──markSynced──▶ synced
//!    │  ▲
//! markFailed  resolve
//!    ▼  │
//!  failed ──markSynced──▶ synced
//! ```
//!
//! Each transition is a single conditional UPDATE, so concurrent transitions on one
//! record serialize in SQLite and the loser observes the winner's state.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    config::LedgerConfig, error::codes, model::SyncStatus, repo, time::now_ms, AppError,
    AppResult,
};

/// Whether a transition changed the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Applied,
    Unchanged,
}

async fn current_status(pool: &SqlitePool, id: &str) -> AppResult<SyncStatus> {
    repo::status_of(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("record", id))
}

/// Record remote acceptance. Re-applying to a synced record is a no-op.
pub async fn mark_synced(pool: &SqlitePool, id: &str) -> AppResult<Transition> {
    let now = now_ms();
    let res = sqlx::query(
        "UPDATE records SET sync_status = 'synced', sync_error = NULL, synced_at = ?1, updated_at = ?1 \
          WHERE id = ?2 AND sync_status IN ('pending', 'failed')",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "mark_synced"))?;

    if res.rows_affected() == 0 {
        current_status(pool, id).await?;
        tracing::debug!(target: "fieldledger", event = "record_already_synced", record_id = %id);
        return Ok(Transition::Unchanged);
    }
    tracing::info!(target: "fieldledger", event = "record_synced", record_id = %id);
    Ok(Transition::Applied)
}

/// Record a remote rejection. Rejected as stale when the record is already synced.
pub async fn mark_failed(pool: &SqlitePool, id: &str, error: &str) -> AppResult<Transition> {
    let res = sqlx::query(
        "UPDATE records SET sync_status = 'failed', sync_error = ?1, updated_at = ?2 \
          WHERE id = ?3 AND sync_status IN ('pending', 'failed')",
    )
    .bind(error)
    .bind(now_ms())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "mark_failed"))?;

    if res.rows_affected() == 0 {
        current_status(pool, id).await?;
        tracing::warn!(
            target: "fieldledger",
            event = "stale_sync_result",
            record_id = %id,
            sync_error = %error
        );
        return Err(AppError::new(
            codes::STALE_RESULT,
            "The record was already accepted by the ledger; the failure was ignored.",
        )
        .with_context("id", id.to_string())
        .with_context("sync_error", error.to_string()));
    }
    tracing::warn!(
        target: "fieldledger",
        event = "record_failed",
        record_id = %id,
        sync_error = %error
    );
    Ok(Transition::Applied)
}

/// Move a failed record back to pending so it is retried, clearing its error.
pub async fn resolve(pool: &SqlitePool, id: &str) -> AppResult<Transition> {
    let res = sqlx::query(
        "UPDATE records SET sync_status = 'pending', sync_error = NULL, updated_at = ?1 \
          WHERE id = ?2 AND sync_status = 'failed'",
    )
    .bind(now_ms())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "resolve"))?;

    if res.rows_affected() == 0 {
        return match current_status(pool, id).await? {
            SyncStatus::Synced => Err(repo::synced_immutable(id)),
            _ => Ok(Transition::Unchanged),
        };
    }
    tracing::info!(target: "fieldledger", event = "record_resolved", record_id = %id);
    Ok(Transition::Applied)
}

/// Permanently delete an unsynced record.
pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
    repo::remove_record(pool, id).await
}

/// Administrative correction path: push a synced record back to pending.
/// Refused unless `allow_reopen` is configured.
pub async fn reopen_for_correction(
    pool: &SqlitePool,
    id: &str,
    config: &LedgerConfig,
) -> AppResult<Transition> {
    if !config.allow_reopen {
        return Err(AppError::new(
            codes::REOPEN_DISABLED,
            "Reopening synced records is not enabled on this device.",
        )
        .with_context("id", id.to_string()));
    }
    let res = sqlx::query(
        "UPDATE records SET sync_status = 'pending', synced_at = NULL, updated_at = ?1 \
          WHERE id = ?2 AND sync_status = 'synced'",
    )
    .bind(now_ms())
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        current_status(pool, id).await?;
        return Ok(Transition::Unchanged);
    }
    tracing::warn!(target: "fieldledger", event = "record_reopened", record_id = %id);
    Ok(Transition::Applied)
}

/// Delete synced records accepted before `synced_before_ms`. Returns the number removed.
pub async fn prune_synced(pool: &SqlitePool, synced_before_ms: i64) -> AppResult<u64> {
    let res = sqlx::query(
        "DELETE FROM records WHERE sync_status = 'synced' AND synced_at IS NOT NULL AND synced_at < ?1",
    )
    .bind(synced_before_ms)
    .execute(pool)
    .await?;
    let removed = res.rows_affected();
    tracing::info!(target: "fieldledger", event = "synced_records_pruned", removed);
    Ok(removed)
}
