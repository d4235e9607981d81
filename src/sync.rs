//! Push loop between the local store and a remote ledger.
//!
//! The transport is supplied by the caller through [`LedgerClient`]. Failed records are not
//! resubmitted here; they go back to pending through `lifecycle::resolve` first.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    error::codes,
    lifecycle::{self, Transition},
    model::{Record, RecordKind, SyncStatus},
    repo, AppError, AppResult,
};

/// Remote side of the sync loop. `Err` carries the message stored as the record's
/// `sync_error`.
pub trait LedgerClient: Send + Sync {
    fn submit<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, Result<(), String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub record_id: String,
    pub kind: RecordKind,
    pub error: String,
}

impl From<&SyncFailure> for AppError {
    fn from(failure: &SyncFailure) -> Self {
        AppError::new(codes::REMOTE_REJECTED, failure.error.clone())
            .with_context("id", failure.record_id.clone())
            .with_context("kind", failure.kind.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// Results that arrived after another writer had already settled the record.
    pub stale: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SyncFailure>,
}

fn is_stale(err: &AppError) -> bool {
    matches!(err.code(), codes::STALE_RESULT | codes::NOT_FOUND)
}

/// Submit every pending record in capture order and record each outcome.
pub async fn push_pending<C>(pool: &SqlitePool, client: &C) -> AppResult<SyncReport>
where
    C: LedgerClient + ?Sized,
{
    let pending = repo::get_by_status(pool, SyncStatus::Pending).await?;
    let mut report = SyncReport::default();
    tracing::info!(target: "fieldledger", event = "sync_push_start", pending = pending.len());

    for record in &pending {
        report.attempted += 1;
        match client.submit(record).await {
            Ok(()) => match lifecycle::mark_synced(pool, &record.id).await {
                Ok(Transition::Applied) => report.synced += 1,
                Ok(Transition::Unchanged) => report.stale += 1,
                Err(err) if is_stale(&err) => report.stale += 1,
                Err(err) => return Err(err),
            },
            Err(message) => match lifecycle::mark_failed(pool, &record.id, &message).await {
                Ok(_) => {
                    report.failed += 1;
                    report.failures.push(SyncFailure {
                        record_id: record.id.clone(),
                        kind: record.kind,
                        error: message,
                    });
                }
                Err(err) if is_stale(&err) => report.stale += 1,
                Err(err) => return Err(err),
            },
        }
    }

    for failure in &report.failures {
        let err = AppError::from(failure);
        tracing::warn!(
            target: "fieldledger",
            event = "sync_record_rejected",
            code = %err.code(),
            record_id = %failure.record_id,
            error = %err.message()
        );
    }
    tracing::info!(
        target: "fieldledger",
        event = "sync_push_complete",
        attempted = report.attempted,
        synced = report.synced,
        failed = report.failed,
        stale = report.stale
    );
    Ok(report)
}
