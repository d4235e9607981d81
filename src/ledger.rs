//! Device-facing entry point. Owns the pool and configuration and routes each operation
//! through validation before it reaches the store.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    advance::{self, AdvancePaymentSplit},
    aggregate,
    cascade::{self, ReassignReport},
    config::LedgerConfig,
    db,
    lifecycle::{self, Transition},
    migrate,
    model::{
        AdvanceLoanPayload, Group, GroupSummary, Loan, Member, MemberBalances, MemberPayload,
        Record, RecordKind, RecordPayload,
    },
    money::Money,
    repo::{self, StatusCount},
    sync::{self, LedgerClient, SyncReport},
    time::now_ms,
    validation, AppResult,
};

/// Result of a bulk-entry capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkOutcome {
    Created { record: Record },
    /// Records for the same member and kind already exist today; nothing was written.
    NeedsConfirmation { existing: Vec<Record> },
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    config: LedgerConfig,
}

impl Ledger {
    /// Open the database named by `config` and bring its schema up to date.
    pub async fn open(config: LedgerConfig) -> AppResult<Self> {
        let pool = db::open_sqlite_pool(&config.db_path).await?;
        Self::from_pool(pool, config).await
    }

    pub async fn from_pool(pool: SqlitePool, config: LedgerConfig) -> AppResult<Self> {
        migrate::apply_migrations(&pool).await?;
        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn split_advance_payment(&self, balance: Money, payment: Money) -> AdvancePaymentSplit {
        advance::split_with_terms(balance, payment, &self.config.split_terms())
    }

    pub fn validate_allocation(&self, collected: Money, allocated: Money) -> AppResult<()> {
        validation::validate_balance(collected, allocated)
    }

    pub async fn has_pending_record(&self, member_id: &str, kind: RecordKind) -> AppResult<bool> {
        repo::has_pending_record(&self.pool, member_id, kind).await
    }

    /// Validate and store a new record, returning its id. A member may hold only one
    /// unsynced record per kind, and a group one unsynced group collection.
    pub async fn add_record(&self, payload: RecordPayload) -> AppResult<String> {
        validation::validate_payload(&payload, &self.config.split_terms())?;
        let record = match &payload {
            RecordPayload::Collection(_)
            | RecordPayload::LoanApplication(_)
            | RecordPayload::AdvanceLoan(_)
            | RecordPayload::GroupCollection(_) => {
                repo::add_record_unique(&self.pool, payload).await?
            }
            RecordPayload::LoanDisbursement(_) | RecordPayload::NewMember(_) => {
                repo::add_record(&self.pool, payload).await?
            }
        };
        Ok(record.id)
    }

    /// Bulk-entry capture. Same-day records for the member are reported back instead of
    /// blocking; the record is written once the caller confirms.
    pub async fn add_record_bulk(
        &self,
        payload: RecordPayload,
        confirm_same_day: bool,
    ) -> AppResult<BulkOutcome> {
        validation::validate_payload(&payload, &self.config.split_terms())?;
        if let (Some(member_id), false) = (payload.member_id(), confirm_same_day) {
            let existing =
                validation::same_day_duplicates(&self.pool, member_id, payload.kind(), now_ms())
                    .await?;
            if !existing.is_empty() {
                tracing::info!(
                    target: "fieldledger",
                    event = "bulk_same_day_duplicate",
                    member_id = %member_id,
                    kind = %payload.kind(),
                    existing = existing.len()
                );
                return Ok(BulkOutcome::NeedsConfirmation { existing });
            }
        }
        let record = repo::add_record(&self.pool, payload).await?;
        Ok(BulkOutcome::Created { record })
    }

    /// Split `payment` against the member's advance `balance` and store the repayment.
    pub async fn capture_advance_repayment(
        &self,
        member_id: &str,
        member_name: &str,
        balance: Money,
        payment: Money,
    ) -> AppResult<Record> {
        let split = self.split_advance_payment(balance, payment);
        let payload = RecordPayload::AdvanceLoan(AdvanceLoanPayload {
            member_id: member_id.to_string(),
            member_name: member_name.to_string(),
            amount: payment,
            current_balance: balance,
            split,
        });
        let id = self.add_record(payload).await?;
        repo::require_record(&self.pool, &id).await
    }

    pub async fn update_record(&self, id: &str, payload: RecordPayload) -> AppResult<Record> {
        validation::validate_payload(&payload, &self.config.split_terms())?;
        repo::update_record(&self.pool, id, payload).await
    }

    pub async fn delete_record(&self, id: &str) -> AppResult<()> {
        lifecycle::delete(&self.pool, id).await
    }

    pub async fn get_record(&self, id: &str) -> AppResult<Option<Record>> {
        repo::get_by_id(&self.pool, id).await
    }

    pub async fn get_all_records(&self, kind: RecordKind) -> AppResult<Vec<Record>> {
        repo::get_all(&self.pool, kind).await
    }

    pub async fn get_unsynced_records(&self, kind: RecordKind) -> AppResult<Vec<Record>> {
        repo::get_unsynced(&self.pool, kind).await
    }

    pub async fn count_by_status(&self) -> AppResult<Vec<StatusCount>> {
        repo::count_by_status(&self.pool).await
    }

    pub async fn mark_synced(&self, id: &str) -> AppResult<Transition> {
        lifecycle::mark_synced(&self.pool, id).await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> AppResult<Transition> {
        lifecycle::mark_failed(&self.pool, id, error).await
    }

    pub async fn resolve(&self, id: &str) -> AppResult<Transition> {
        lifecycle::resolve(&self.pool, id).await
    }

    pub async fn reopen_for_correction(&self, id: &str) -> AppResult<Transition> {
        lifecycle::reopen_for_correction(&self.pool, id, &self.config).await
    }

    pub async fn prune_synced(&self, synced_before_ms: i64) -> AppResult<u64> {
        lifecycle::prune_synced(&self.pool, synced_before_ms).await
    }

    pub async fn reassign_member_id(
        &self,
        old_id: &str,
        new_id: &str,
        payload: &MemberPayload,
    ) -> AppResult<ReassignReport> {
        cascade::reassign_member_id(&self.pool, old_id, new_id, payload).await
    }

    pub async fn summarize_groups(&self) -> AppResult<Vec<GroupSummary>> {
        aggregate::summarize_groups(&self.pool).await
    }

    pub async fn carry_forward(&self, member_id: &str) -> AppResult<MemberBalances> {
        aggregate::carry_forward(&self.pool, member_id).await
    }

    pub async fn push_pending<C>(&self, client: &C) -> AppResult<SyncReport>
    where
        C: LedgerClient + ?Sized,
    {
        sync::push_pending(&self.pool, client).await
    }

    pub async fn upsert_group(&self, group: &Group) -> AppResult<()> {
        repo::upsert_group(&self.pool, group).await
    }

    pub async fn get_group(&self, id: &str) -> AppResult<Option<Group>> {
        repo::get_group(&self.pool, id).await
    }

    pub async fn upsert_member(&self, member: &Member) -> AppResult<()> {
        repo::upsert_member(&self.pool, member).await
    }

    pub async fn refresh_member_balances(
        &self,
        member_id: &str,
        balances: &MemberBalances,
    ) -> AppResult<()> {
        repo::refresh_member_balances(&self.pool, member_id, balances).await
    }

    pub async fn get_member(&self, id: &str) -> AppResult<Option<Member>> {
        repo::get_member(&self.pool, id).await
    }

    pub async fn list_group_members(&self, group_id: &str) -> AppResult<Vec<Member>> {
        repo::list_group_members(&self.pool, group_id).await
    }

    pub async fn upsert_loan(&self, loan: &Loan) -> AppResult<()> {
        repo::upsert_loan(&self.pool, loan).await
    }

    pub async fn get_loan(&self, id: &str) -> AppResult<Option<Loan>> {
        repo::get_loan(&self.pool, id).await
    }
}
