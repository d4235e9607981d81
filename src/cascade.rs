//! Member id reassignment.
//!
//! The member row, every member-keyed record, guarantor entries on loan applications and
//! the loan index move from the old id to the new one inside one transaction. Re-running a
//! completed reassignment finds nothing left under the old id and changes nothing.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    db::run_in_tx,
    error::codes,
    model::{Member, MemberPayload, Record, RecordKind},
    repo::{decode_member, decode_record},
    time::now_ms,
    AppError, AppResult,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignReport {
    pub old_id: String,
    pub new_id: String,
    pub member_moved: bool,
    pub records_rewritten: u64,
    pub loans_rewritten: u64,
}

impl ReassignReport {
    pub fn is_noop(&self) -> bool {
        !self.member_moved && self.records_rewritten == 0 && self.loans_rewritten == 0
    }
}

async fn load_member(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<Member>> {
    let row = sqlx::query(
        "SELECT id, name, phone, group_id, savings, loan, advance, unallocated, total_outstanding \
           FROM members WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(decode_member).transpose()
}

/// Loan applications listing `member_id` among their guarantors. Guarantors live in the
/// payload only, so every loan application is decoded.
async fn guaranteed_by(conn: &mut SqliteConnection, member_id: &str) -> AppResult<Vec<Record>> {
    let rows = sqlx::query(
        "SELECT id, kind, payload, sync_status, sync_error, created_at, updated_at, synced_at \
           FROM records WHERE kind = ?1 ORDER BY seq",
    )
    .bind(RecordKind::LoanApplication)
    .fetch_all(&mut *conn)
    .await?;
    let mut found = Vec::new();
    for row in rows {
        let record = decode_record(row)?;
        if record.payload.has_guarantor(member_id) {
            found.push(record);
        }
    }
    Ok(found)
}

async fn write_payload(
    conn: &mut SqliteConnection,
    record: &Record,
    member_id: &str,
    now: i64,
) -> AppResult<()> {
    let body = serde_json::to_string(&record.payload)?;
    sqlx::query("UPDATE records SET member_id = ?1, payload = ?2, updated_at = ?3 WHERE id = ?4")
        .bind(member_id)
        .bind(&body)
        .bind(now)
        .bind(&record.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Whether anything in the store already refers to `member_id`.
async fn is_referenced(conn: &mut SqliteConnection, member_id: &str) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM records WHERE member_id = ?1) \
              + (SELECT COUNT(*) FROM loans WHERE member_id = ?1) \
              + (SELECT COUNT(*) FROM members WHERE id = ?1)",
    )
    .bind(member_id)
    .fetch_one(&mut *conn)
    .await?;
    if count > 0 {
        return Ok(true);
    }
    Ok(!guaranteed_by(conn, member_id).await?.is_empty())
}

fn member_keyed_kinds() -> String {
    RecordKind::MEMBER_KEYED
        .iter()
        .map(|kind| format!("'{}'", kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn move_member_row(
    conn: &mut SqliteConnection,
    old: &Member,
    new_id: &str,
    payload: &MemberPayload,
) -> AppResult<()> {
    let b = &old.balances;
    sqlx::query(
        "INSERT INTO members (id, name, phone, group_id, savings, loan, advance, unallocated, total_outstanding, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(new_id)
    .bind(&payload.name)
    .bind(payload.phone.as_deref().or(old.phone.as_deref()))
    .bind(payload.group_id.as_deref().or(old.group_id.as_deref()))
    .bind(b.savings.cents())
    .bind(b.loan.cents())
    .bind(b.advance.cents())
    .bind(b.unallocated.cents())
    .bind(b.total_outstanding.cents())
    .bind(now_ms())
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM members WHERE id = ?1")
        .bind(&old.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn reassign_in_tx(
    conn: &mut SqliteConnection,
    old_id: &str,
    new_id: &str,
    payload: &MemberPayload,
) -> AppResult<ReassignReport> {
    let mut report = ReassignReport {
        old_id: old_id.to_string(),
        new_id: new_id.to_string(),
        ..ReassignReport::default()
    };

    let old_member = load_member(conn, old_id).await?;
    let new_member = load_member(conn, new_id).await?;
    match (&old_member, &new_member) {
        (Some(_), Some(_)) => {
            return Err(AppError::new(
                codes::MEMBER_ID_CONFLICT,
                "The new member id already belongs to another member.",
            )
            .with_context("old_id", old_id.to_string())
            .with_context("new_id", new_id.to_string()));
        }
        (Some(old), None) => {
            move_member_row(conn, old, new_id, payload).await?;
            report.member_moved = true;
        }
        (None, _) => {}
    }

    let sql = format!(
        "SELECT id, kind, payload, sync_status, sync_error, created_at, updated_at, synced_at \
           FROM records WHERE member_id = ?1 AND kind IN ({}) ORDER BY seq",
        member_keyed_kinds()
    );
    let rows = sqlx::query(&sql).bind(old_id).fetch_all(&mut *conn).await?;
    let now = now_ms();
    for row in rows {
        let mut record = decode_record(row)?;
        record.payload.reassign_member(new_id, &payload.name);
        record.payload.reassign_guarantor(old_id, new_id, &payload.name);
        write_payload(conn, &record, new_id, now).await?;
        report.records_rewritten += 1;
    }

    for mut record in guaranteed_by(conn, old_id).await? {
        record.payload.reassign_guarantor(old_id, new_id, &payload.name);
        let borrower = record.payload.member_id().unwrap_or_default().to_string();
        write_payload(conn, &record, &borrower, now).await?;
        report.records_rewritten += 1;
    }

    report.loans_rewritten = sqlx::query("UPDATE loans SET member_id = ?1, updated_at = ?2 WHERE member_id = ?3")
        .bind(new_id)
        .bind(now)
        .bind(old_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let dangling: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM records WHERE member_id = ?1) \
              + (SELECT COUNT(*) FROM members WHERE id = ?1)",
    )
    .bind(old_id)
    .fetch_one(&mut *conn)
    .await?;
    let dangling = dangling + guaranteed_by(conn, old_id).await?.len() as i64;
    if dangling != 0 {
        return Err(AppError::new(
            codes::INCONSISTENT_STATE,
            "References to the old member id remained after reassignment.",
        )
        .with_context("old_id", old_id.to_string())
        .with_context("dangling", dangling.to_string()));
    }

    // Nothing moved: either this pair was already applied, or neither id was ever seen.
    if old_member.is_none() && report.is_noop() && !is_referenced(conn, new_id).await? {
        return Err(AppError::not_found("member", old_id));
    }

    Ok(report)
}

/// Move member `old_id` to `new_id`, applying `payload` to the member row and refreshing
/// the member name on every dependent record.
pub async fn reassign_member_id(
    pool: &SqlitePool,
    old_id: &str,
    new_id: &str,
    payload: &MemberPayload,
) -> AppResult<ReassignReport> {
    if old_id == new_id {
        return Err(AppError::new(
            codes::MEMBER_ID_UNCHANGED,
            "The new member id is the same as the current one.",
        )
        .with_context("id", old_id.to_string()));
    }
    if new_id.trim().is_empty() {
        return Err(AppError::new(codes::FIELD_REQUIRED, "new member id is required.")
            .with_context("field", "new_id"));
    }

    let old = old_id.to_string();
    let new = new_id.to_string();
    let payload = payload.clone();
    let report = run_in_tx(pool, move |tx| {
        async move { reassign_in_tx(tx, &old, &new, &payload).await }.boxed()
    })
    .await?;

    if report.is_noop() {
        tracing::debug!(
            target: "fieldledger",
            event = "member_reassign_noop",
            old_id = %old_id,
            new_id = %new_id
        );
    } else {
        tracing::info!(
            target: "fieldledger",
            event = "member_reassigned",
            old_id = %old_id,
            new_id = %new_id,
            member_moved = report.member_moved,
            records_rewritten = report.records_rewritten,
            loans_rewritten = report.loans_rewritten
        );
    }
    Ok(report)
}
