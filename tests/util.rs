#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use fieldledger_lib::{
    model::{
        Allocation, AllocationKind, CollectionPayload, Group, GroupCollectionPayload, Loan,
        LoanDisbursementPayload, Member, MemberBalances,
    },
    Ledger, LedgerConfig, Money, RecordPayload,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn ledger() -> Ledger {
    ledger_with(LedgerConfig::default()).await
}

pub async fn ledger_with(config: LedgerConfig) -> Ledger {
    Ledger::from_pool(temp_pool().await, config)
        .await
        .expect("migrate in-memory ledger")
}

pub fn units(v: i64) -> Money {
    Money::from_units(v)
}

pub fn collection(member_id: &str, cash: i64, mpesa: i64, allocations: Vec<Allocation>) -> RecordPayload {
    RecordPayload::Collection(CollectionPayload {
        member_id: member_id.into(),
        member_name: format!("Member {member_id}"),
        total_amount: units(cash + mpesa),
        cash_amount: units(cash),
        mpesa_amount: units(mpesa),
        allocations,
    })
}

/// A balanced collection with everything going to savings.
pub fn savings_collection(member_id: &str, cash: i64) -> RecordPayload {
    collection(
        member_id,
        cash,
        0,
        vec![Allocation::new(AllocationKind::Savings, units(cash))],
    )
}

pub fn disbursement(loan_id: &str, member_id: &str, amount: i64) -> RecordPayload {
    RecordPayload::LoanDisbursement(LoanDisbursementPayload {
        loan_id: loan_id.into(),
        member_id: member_id.into(),
        requested_amount: units(amount),
        selected_amount: units(amount),
    })
}

pub fn group_collection(group_id: &str, cash: i64, fines: i64) -> RecordPayload {
    RecordPayload::GroupCollection(GroupCollectionPayload {
        group_id: group_id.into(),
        group_name: format!("Group {group_id}"),
        cash_collected: units(cash),
        fines_collected: units(fines),
    })
}

pub async fn seed_group(ledger: &Ledger, id: &str, name: &str) {
    ledger
        .upsert_group(&Group {
            id: id.into(),
            name: name.into(),
        })
        .await
        .unwrap();
}

pub async fn seed_member(ledger: &Ledger, id: &str, group_id: &str, balances: MemberBalances) {
    ledger
        .upsert_member(&Member {
            id: id.into(),
            name: format!("Member {id}"),
            phone: Some("0712345678".into()),
            group_id: Some(group_id.into()),
            balances,
        })
        .await
        .unwrap();
}

pub async fn seed_loan(ledger: &Ledger, id: &str, member_id: &str, group_id: Option<&str>) {
    ledger
        .upsert_loan(&Loan {
            id: id.into(),
            member_id: member_id.into(),
            group_id: group_id.map(str::to_string),
            principal: units(5_000),
        })
        .await
        .unwrap();
}
