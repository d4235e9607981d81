//! Group rollups and member carry-forward balances over unsynced records.
//!
//! Both are recomputed from the store on every call; nothing here writes.

use std::collections::HashMap;

use futures::FutureExt;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    db::run_in_tx,
    model::{AllocationKind, GroupSummary, MemberBalances, Record, RecordPayload},
    money::Money,
    repo::{self, decode_record, RECORD_COLUMNS, UNSYNCED},
    AppError, AppResult,
};

struct Snapshot {
    records: Vec<Record>,
    member_groups: HashMap<String, Option<String>>,
    loan_groups: HashMap<String, Option<String>>,
    group_names: HashMap<String, String>,
}

async fn read_snapshot(conn: &mut SqliteConnection) -> AppResult<Snapshot> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE sync_status IN {UNSYNCED} ORDER BY seq"
    );
    let records = sqlx::query(&sql)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(decode_record)
        .collect::<AppResult<Vec<_>>>()?;

    let member_groups: HashMap<String, Option<String>> =
        sqlx::query_as::<_, (String, Option<String>)>("SELECT id, group_id FROM members")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();
    let loan_groups: HashMap<String, Option<String>> =
        sqlx::query_as::<_, (String, Option<String>)>("SELECT id, group_id FROM loans")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();
    let group_names: HashMap<String, String> =
        sqlx::query_as::<_, (String, String)>("SELECT id, name FROM groups")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    Ok(Snapshot {
        records,
        member_groups,
        loan_groups,
        group_names,
    })
}

impl Snapshot {
    fn member_group(&self, member_id: &str) -> Option<&str> {
        self.member_groups.get(member_id)?.as_deref()
    }

    /// A loan's own group wins; otherwise the borrower's group.
    fn loan_group(&self, loan_id: &str, member_id: &str) -> Option<&str> {
        match self.loan_groups.get(loan_id) {
            Some(Some(group)) => Some(group),
            _ => self.member_group(member_id),
        }
    }
}

fn entry<'a>(
    totals: &'a mut HashMap<String, GroupSummary>,
    group_id: &str,
) -> &'a mut GroupSummary {
    totals
        .entry(group_id.to_string())
        .or_insert_with(|| GroupSummary {
            group_id: group_id.to_string(),
            ..GroupSummary::default()
        })
}

fn fold(snapshot: &Snapshot) -> Vec<GroupSummary> {
    let mut totals: HashMap<String, GroupSummary> = HashMap::new();
    let mut payload_names: HashMap<String, String> = HashMap::new();
    let mut unmapped = 0usize;

    for record in &snapshot.records {
        match &record.payload {
            RecordPayload::Collection(p) => {
                let Some(group) = snapshot.member_group(&p.member_id) else {
                    unmapped += 1;
                    continue;
                };
                let summary = entry(&mut totals, group);
                summary.total_cash += p.cash_amount;
                summary.total_mpesa += p.mpesa_amount;
                summary.total_advances += p.allocated_to(AllocationKind::AdvancePayment);
            }
            RecordPayload::AdvanceLoan(p) => {
                let Some(group) = snapshot.member_group(&p.member_id) else {
                    unmapped += 1;
                    continue;
                };
                entry(&mut totals, group).total_advances += p.amount;
            }
            RecordPayload::LoanDisbursement(p) => {
                let Some(group) = snapshot.loan_group(&p.loan_id, &p.member_id) else {
                    unmapped += 1;
                    continue;
                };
                entry(&mut totals, group).total_loans += p.selected_amount;
            }
            RecordPayload::GroupCollection(p) => {
                let summary = entry(&mut totals, &p.group_id);
                summary.total_fines += p.fines_collected;
                summary.office_cash += p.cash_collected;
                payload_names
                    .entry(p.group_id.clone())
                    .or_insert_with(|| p.group_name.clone());
            }
            RecordPayload::LoanApplication(_) | RecordPayload::NewMember(_) => {}
        }
    }

    if unmapped > 0 {
        tracing::debug!(target: "fieldledger", event = "summary_records_unmapped", unmapped);
    }

    let mut summaries: Vec<GroupSummary> = totals
        .into_values()
        .map(|mut s| {
            s.group_name = snapshot
                .group_names
                .get(&s.group_id)
                .or_else(|| payload_names.get(&s.group_id))
                .cloned()
                .unwrap_or_else(|| s.group_id.clone());
            s.net_cash_remitted = s.total_cash + s.total_fines + s.office_cash - s.total_advances;
            s
        })
        .collect();
    summaries.sort_by(|a, b| {
        a.group_name
            .cmp(&b.group_name)
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    summaries
}

/// Per-group totals of every pending or failed record.
pub async fn summarize_groups(pool: &SqlitePool) -> AppResult<Vec<GroupSummary>> {
    let snapshot = run_in_tx(pool, |tx| async move { read_snapshot(tx).await }.boxed()).await?;
    let summaries = fold(&snapshot);
    tracing::debug!(
        target: "fieldledger",
        event = "groups_summarized",
        records = snapshot.records.len(),
        groups = summaries.len()
    );
    Ok(summaries)
}

fn apply_unsynced(mut balances: MemberBalances, records: &[Record]) -> MemberBalances {
    let mut repaid = Money::ZERO;
    for record in records.iter().filter(|r| r.sync_status.is_unsynced()) {
        match &record.payload {
            RecordPayload::Collection(p) => {
                for allocation in &p.allocations {
                    match allocation.kind {
                        AllocationKind::Savings => balances.savings += allocation.amount,
                        AllocationKind::Loan => {
                            balances.loan -= allocation.amount;
                            repaid += allocation.amount;
                        }
                        AllocationKind::AdvancePayment => {
                            balances.advance -= allocation.amount;
                            repaid += allocation.amount;
                        }
                        AllocationKind::Other => balances.unallocated += allocation.amount,
                    }
                }
            }
            RecordPayload::AdvanceLoan(p) => {
                balances.advance -= p.split.pay_advance;
                repaid += p.split.pay_advance;
            }
            _ => {}
        }
    }
    balances.total_outstanding -= repaid;
    balances
}

/// The member's last known balances with their pending and failed allocations applied.
pub async fn carry_forward(pool: &SqlitePool, member_id: &str) -> AppResult<MemberBalances> {
    let member = repo::get_member(pool, member_id)
        .await?
        .ok_or_else(|| AppError::not_found("member", member_id))?;
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records \
          WHERE member_id = ?1 AND kind IN ('collection', 'advance_loan') AND sync_status IN {UNSYNCED} \
          ORDER BY seq"
    );
    let records = sqlx::query(&sql)
        .bind(member_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(decode_record)
        .collect::<AppResult<Vec<_>>>()?;
    Ok(apply_unsynced(member.balances, &records))
}
