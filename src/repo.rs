//! Local record store: typed CRUD over captured records plus the member, group and loan
//! reference data they join against.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    error::codes,
    id::new_uuid_v7,
    model::{Group, Loan, Member, MemberBalances, Record, RecordKind, RecordPayload, SyncStatus},
    money::Money,
    time::now_ms,
    AppError, AppResult,
};

pub(crate) const RECORD_COLUMNS: &str =
    "id, kind, payload, sync_status, sync_error, created_at, updated_at, synced_at";

pub(crate) const UNSYNCED: &str = "('pending', 'failed')";

pub(crate) fn decode_record(row: SqliteRow) -> AppResult<Record> {
    let id: String = row.try_get("id")?;
    let kind: RecordKind = row.try_get("kind")?;
    let raw: String = row.try_get("payload")?;
    let payload: RecordPayload = serde_json::from_str(&raw).map_err(|err| {
        AppError::new(codes::DECODE_ERROR, "Stored record payload could not be read.")
            .with_context("id", id.clone())
            .with_cause(err)
    })?;
    if payload.kind() != kind {
        return Err(AppError::new(
            codes::DECODE_ERROR,
            "Stored record payload does not match its kind.",
        )
        .with_context("id", id)
        .with_context("kind", kind.as_str())
        .with_context("payload_kind", payload.kind().as_str()));
    }

    Ok(Record {
        id,
        kind,
        payload,
        sync_status: row.try_get("sync_status")?,
        sync_error: row.try_get("sync_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        synced_at: row.try_get("synced_at")?,
    })
}

fn encode_payload(payload: &RecordPayload) -> AppResult<String> {
    serde_json::to_string(payload).map_err(AppError::from)
}

fn new_record(payload: RecordPayload) -> Record {
    let now = now_ms();
    Record {
        id: new_uuid_v7(),
        kind: payload.kind(),
        payload,
        sync_status: SyncStatus::Pending,
        sync_error: None,
        created_at: now,
        updated_at: now,
        synced_at: None,
    }
}

fn log_added(record: &Record) {
    tracing::info!(
        target: "fieldledger",
        event = "record_added",
        record_id = %record.id,
        kind = %record.kind,
        member_id = record.payload.member_id(),
        group_id = record.payload.group_id()
    );
}

/// Insert a new pending record and return it.
pub async fn add_record(pool: &SqlitePool, payload: RecordPayload) -> AppResult<Record> {
    let record = new_record(payload);
    let body = encode_payload(&record.payload)?;
    sqlx::query(
        "INSERT INTO records (id, kind, member_id, group_id, loan_id, payload, sync_status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
    )
    .bind(&record.id)
    .bind(record.kind)
    .bind(record.payload.member_id())
    .bind(record.payload.group_id())
    .bind(record.payload.loan_id())
    .bind(&body)
    .bind(record.created_at)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "records_insert"))?;
    log_added(&record);
    Ok(record)
}

/// Insert a new pending record unless its owner already has an unsynced record of the
/// same kind. Member-keyed records are owned by their member, group collections by their
/// group. The check and the insert are one statement.
pub async fn add_record_unique(pool: &SqlitePool, payload: RecordPayload) -> AppResult<Record> {
    let (column, owner) = match (payload.member_id(), &payload) {
        (Some(member_id), _) => ("member_id", member_id.to_string()),
        (None, RecordPayload::GroupCollection(p)) => ("group_id", p.group_id.clone()),
        (None, _) => return add_record(pool, payload).await,
    };
    let record = new_record(payload);
    let body = encode_payload(&record.payload)?;
    let sql = format!(
        "INSERT INTO records (id, kind, member_id, group_id, loan_id, payload, sync_status, created_at, updated_at) \
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7 \
          WHERE NOT EXISTS (SELECT 1 FROM records WHERE {column} = ?8 AND kind = ?2 AND sync_status IN {UNSYNCED})"
    );
    let res = sqlx::query(&sql)
        .bind(&record.id)
        .bind(record.kind)
        .bind(record.payload.member_id())
        .bind(record.payload.group_id())
        .bind(record.payload.loan_id())
        .bind(&body)
        .bind(record.created_at)
        .bind(&owner)
        .execute(pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "records_insert_unique"))?;
    if res.rows_affected() == 0 {
        return Err(match column {
            "group_id" => duplicate_group_pending(&owner),
            _ => duplicate_pending(&owner, record.kind),
        });
    }
    log_added(&record);
    Ok(record)
}

fn duplicate_group_pending(group_id: &str) -> AppError {
    AppError::new(
        codes::DUPLICATE_PENDING,
        "This group already has an unsynced collection. Edit or delete it first.",
    )
    .with_context("group_id", group_id.to_string())
    .with_context("kind", RecordKind::GroupCollection.as_str())
}

pub(crate) fn duplicate_pending(member_id: &str, kind: RecordKind) -> AppError {
    AppError::new(
        codes::DUPLICATE_PENDING,
        "This member already has an unsynced record of this type. Edit or delete it first.",
    )
    .with_context("member_id", member_id.to_string())
    .with_context("kind", kind.as_str())
}

/// Replace the payload of an unsynced record.
///
/// The kind and member reference are fixed; a failed record becomes pending again.
pub async fn update_record(
    pool: &SqlitePool,
    id: &str,
    payload: RecordPayload,
) -> AppResult<Record> {
    let existing = require_record(pool, id).await?;
    if existing.kind != payload.kind() {
        return Err(AppError::new(
            codes::KIND_MISMATCH,
            "A record cannot change its type.",
        )
        .with_context("id", id.to_string())
        .with_context("kind", existing.kind.as_str())
        .with_context("payload_kind", payload.kind().as_str()));
    }
    if existing.payload.member_id() != payload.member_id() {
        return Err(AppError::new(
            codes::MEMBER_IMMUTABLE,
            "A record cannot be moved to another member by editing it.",
        )
        .with_context("id", id.to_string()));
    }
    if existing.sync_status == SyncStatus::Synced {
        return Err(synced_immutable(id));
    }

    let body = encode_payload(&payload)?;
    let now = now_ms();
    let res = sqlx::query(
        "UPDATE records SET payload = ?1, group_id = ?2, loan_id = ?3, updated_at = ?4, \
                sync_status = 'pending', sync_error = NULL \
          WHERE id = ?5 AND sync_status != 'synced'",
    )
    .bind(&body)
    .bind(payload.group_id())
    .bind(payload.loan_id())
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "records_update"))?;
    if res.rows_affected() == 0 {
        // Synced between the read and the write.
        return Err(synced_immutable(id));
    }

    tracing::info!(
        target: "fieldledger",
        event = "record_updated",
        record_id = %id,
        kind = %existing.kind,
        previous_status = %existing.sync_status
    );

    Ok(Record {
        payload,
        sync_status: SyncStatus::Pending,
        sync_error: None,
        updated_at: now,
        ..existing
    })
}

pub(crate) fn synced_immutable(id: &str) -> AppError {
    AppError::new(
        codes::SYNCED_IMMUTABLE,
        "This record has already been accepted by the ledger and cannot be changed.",
    )
    .with_context("id", id.to_string())
}

/// Permanently delete an unsynced record.
pub async fn remove_record(pool: &SqlitePool, id: &str) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM records WHERE id = ?1 AND sync_status != 'synced'")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "records_delete"))?;
    if res.rows_affected() == 0 {
        return match status_of(pool, id).await? {
            Some(_) => Err(synced_immutable(id)),
            None => Err(AppError::not_found("record", id)),
        };
    }
    tracing::info!(target: "fieldledger", event = "record_deleted", record_id = %id);
    Ok(())
}

pub async fn status_of(pool: &SqlitePool, id: &str) -> AppResult<Option<SyncStatus>> {
    let status = sqlx::query_scalar("SELECT sync_status FROM records WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(status)
}

pub async fn get_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Record>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.map(decode_record).transpose()
}

pub async fn require_record(pool: &SqlitePool, id: &str) -> AppResult<Record> {
    get_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("record", id))
}

/// Every record of `kind`, in capture order.
pub async fn get_all(pool: &SqlitePool, kind: RecordKind) -> AppResult<Vec<Record>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 ORDER BY seq");
    let rows = sqlx::query(&sql).bind(kind).fetch_all(pool).await?;
    rows.into_iter().map(decode_record).collect()
}

/// Pending and failed records of `kind`, in capture order.
pub async fn get_unsynced(pool: &SqlitePool, kind: RecordKind) -> AppResult<Vec<Record>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 AND sync_status IN {UNSYNCED} ORDER BY seq"
    );
    let rows = sqlx::query(&sql).bind(kind).fetch_all(pool).await?;
    rows.into_iter().map(decode_record).collect()
}

/// Records of every kind in `status`, in capture order.
pub async fn get_by_status(pool: &SqlitePool, status: SyncStatus) -> AppResult<Vec<Record>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE sync_status = ?1 ORDER BY seq");
    let rows = sqlx::query(&sql).bind(status).fetch_all(pool).await?;
    rows.into_iter().map(decode_record).collect()
}

pub async fn has_pending_record(
    pool: &SqlitePool,
    member_id: &str,
    kind: RecordKind,
) -> AppResult<bool> {
    let sql = format!(
        "SELECT 1 FROM records WHERE member_id = ?1 AND kind = ?2 AND sync_status IN {UNSYNCED} LIMIT 1"
    );
    let found: Option<i64> = sqlx::query_scalar(&sql)
        .bind(member_id)
        .bind(kind)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Whether an unsynced group collection already exists for `group_id`.
pub async fn has_unsynced_group_record(pool: &SqlitePool, group_id: &str) -> AppResult<bool> {
    let sql = format!(
        "SELECT 1 FROM records WHERE group_id = ?1 AND kind = 'group_collection' AND sync_status IN {UNSYNCED} LIMIT 1"
    );
    let found: Option<i64> = sqlx::query_scalar(&sql)
        .bind(group_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Records of `kind` for `member_id` created within `[start_ms, end_ms)`, any status.
pub async fn member_records_between(
    pool: &SqlitePool,
    member_id: &str,
    kind: RecordKind,
    start_ms: i64,
    end_ms: i64,
) -> AppResult<Vec<Record>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records \
          WHERE member_id = ?1 AND kind = ?2 AND created_at >= ?3 AND created_at < ?4 \
          ORDER BY seq"
    );
    let rows = sqlx::query(&sql)
        .bind(member_id)
        .bind(kind)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(decode_record).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub kind: RecordKind,
    pub status: SyncStatus,
    pub count: i64,
}

pub async fn count_by_status(pool: &SqlitePool) -> AppResult<Vec<StatusCount>> {
    let rows = sqlx::query(
        "SELECT kind, sync_status, COUNT(*) AS n FROM records GROUP BY kind, sync_status ORDER BY kind, sync_status",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(StatusCount {
                kind: row.try_get("kind")?,
                status: row.try_get("sync_status")?,
                count: row.try_get("n")?,
            })
        })
        .collect()
}

pub async fn upsert_group(pool: &SqlitePool, group: &Group) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO groups (id, name, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
    )
    .bind(&group.id)
    .bind(&group.name)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_group(pool: &SqlitePool, id: &str) -> AppResult<Option<Group>> {
    let row: Option<(String, String)> = sqlx::query_as("SELECT id, name FROM groups WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id, name)| Group { id, name }))
}

const MEMBER_COLUMNS: &str =
    "id, name, phone, group_id, savings, loan, advance, unallocated, total_outstanding";

pub(crate) fn decode_member(row: SqliteRow) -> AppResult<Member> {
    let cents = |col: &str| -> AppResult<Money> { Ok(Money::from_cents(row.try_get(col)?)) };
    Ok(Member {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        group_id: row.try_get("group_id")?,
        balances: MemberBalances {
            savings: cents("savings")?,
            loan: cents("loan")?,
            advance: cents("advance")?,
            unallocated: cents("unallocated")?,
            total_outstanding: cents("total_outstanding")?,
        },
    })
}

/// Insert or refresh a member from the remote ledger.
pub async fn upsert_member(pool: &SqlitePool, member: &Member) -> AppResult<()> {
    let b = &member.balances;
    sqlx::query(
        "INSERT INTO members (id, name, phone, group_id, savings, loan, advance, unallocated, total_outstanding, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, phone = excluded.phone, \
             group_id = excluded.group_id, savings = excluded.savings, loan = excluded.loan, \
             advance = excluded.advance, unallocated = excluded.unallocated, \
             total_outstanding = excluded.total_outstanding, updated_at = excluded.updated_at",
    )
    .bind(&member.id)
    .bind(&member.name)
    .bind(&member.phone)
    .bind(&member.group_id)
    .bind(b.savings.cents())
    .bind(b.loan.cents())
    .bind(b.advance.cents())
    .bind(b.unallocated.cents())
    .bind(b.total_outstanding.cents())
    .bind(now_ms())
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "members_upsert"))?;
    Ok(())
}

pub async fn refresh_member_balances(
    pool: &SqlitePool,
    member_id: &str,
    balances: &MemberBalances,
) -> AppResult<()> {
    let res = sqlx::query(
        "UPDATE members SET savings = ?1, loan = ?2, advance = ?3, unallocated = ?4, \
                total_outstanding = ?5, updated_at = ?6 WHERE id = ?7",
    )
    .bind(balances.savings.cents())
    .bind(balances.loan.cents())
    .bind(balances.advance.cents())
    .bind(balances.unallocated.cents())
    .bind(balances.total_outstanding.cents())
    .bind(now_ms())
    .bind(member_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::not_found("member", member_id));
    }
    tracing::debug!(target: "fieldledger", event = "member_balances_refreshed", member_id = %member_id);
    Ok(())
}

pub async fn get_member(pool: &SqlitePool, id: &str) -> AppResult<Option<Member>> {
    let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.map(decode_member).transpose()
}

pub async fn list_group_members(pool: &SqlitePool, group_id: &str) -> AppResult<Vec<Member>> {
    let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE group_id = ?1 ORDER BY name, id");
    let rows = sqlx::query(&sql).bind(group_id).fetch_all(pool).await?;
    rows.into_iter().map(decode_member).collect()
}

pub async fn upsert_loan(pool: &SqlitePool, loan: &Loan) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO loans (id, member_id, group_id, principal, updated_at) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(id) DO UPDATE SET member_id = excluded.member_id, group_id = excluded.group_id, \
             principal = excluded.principal, updated_at = excluded.updated_at",
    )
    .bind(&loan.id)
    .bind(&loan.member_id)
    .bind(&loan.group_id)
    .bind(loan.principal.cents())
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_loan(pool: &SqlitePool, id: &str) -> AppResult<Option<Loan>> {
    let row: Option<(String, String, Option<String>, i64)> =
        sqlx::query_as("SELECT id, member_id, group_id, principal FROM loans WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id, member_id, group_id, principal)| Loan {
        id,
        member_id,
        group_id,
        principal: Money::from_cents(principal),
    }))
}
