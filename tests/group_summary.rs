use anyhow::Result;
use fieldledger_lib::{
    error::codes,
    model::{Allocation, AllocationKind, MemberBalances},
    Money,
};

#[path = "util.rs"]
mod util;

use util::{collection, disbursement, group_collection, savings_collection, units};

#[tokio::test]
async fn empty_store_has_no_groups() -> Result<()> {
    let ledger = util::ledger().await;
    assert!(ledger.summarize_groups().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cash_and_advance_payment_roll_up_to_the_group() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_group(&ledger, "g-1", "Umoja").await;
    util::seed_member(&ledger, "m-1", "g-1", MemberBalances::default()).await;

    ledger
        .add_record(collection(
            "m-1",
            1_000,
            0,
            vec![
                Allocation::new(AllocationKind::Savings, units(600)),
                Allocation::new(AllocationKind::AdvancePayment, units(400)),
            ],
        ))
        .await?;

    let summaries = ledger.summarize_groups().await?;
    assert_eq!(summaries.len(), 1);
    let umoja = &summaries[0];
    assert_eq!(umoja.group_id, "g-1");
    assert_eq!(umoja.group_name, "Umoja");
    assert_eq!(umoja.total_cash, units(1_000));
    assert_eq!(umoja.total_mpesa, Money::ZERO);
    assert_eq!(umoja.total_advances, units(400));
    assert_eq!(umoja.net_cash_remitted, units(600));
    Ok(())
}

#[tokio::test]
async fn synced_records_drop_out_of_the_summary() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_group(&ledger, "g-1", "Umoja").await;
    util::seed_member(&ledger, "m-1", "g-1", MemberBalances::default()).await;
    util::seed_member(&ledger, "m-2", "g-1", MemberBalances::default()).await;

    let synced = ledger.add_record(savings_collection("m-1", 700)).await?;
    let failed = ledger.add_record(savings_collection("m-2", 300)).await?;
    ledger.mark_synced(&synced).await?;
    ledger.mark_failed(&failed, "timeout").await?;

    let summaries = ledger.summarize_groups().await?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].total_cash, units(300));
    Ok(())
}

#[tokio::test]
async fn every_kind_lands_in_its_column() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_group(&ledger, "g-a", "Amani").await;
    util::seed_group(&ledger, "g-b", "Baraka").await;
    util::seed_member(&ledger, "m-1", "g-b", MemberBalances::default()).await;
    util::seed_member(&ledger, "m-2", "g-a", MemberBalances::default()).await;
    util::seed_loan(&ledger, "L-1", "m-1", Some("g-a")).await;
    util::seed_loan(&ledger, "L-2", "m-1", None).await;

    ledger.add_record(collection("m-1", 200, 300, vec![
        Allocation::new(AllocationKind::Loan, units(500)),
    ])).await?;
    ledger
        .capture_advance_repayment("m-2", "Member m-2", units(1_000), units(200))
        .await?;
    ledger.add_record(disbursement("L-1", "m-1", 2_000)).await?;
    ledger.add_record(disbursement("L-2", "m-1", 1_000)).await?;
    ledger.add_record(group_collection("g-b", 150, 50)).await?;
    // No member row, so it cannot be placed in a group.
    ledger.add_record(savings_collection("stranger", 999)).await?;

    let summaries = ledger.summarize_groups().await?;
    let names: Vec<_> = summaries.iter().map(|s| s.group_name.as_str()).collect();
    assert_eq!(names, vec!["Amani", "Baraka"]);

    let amani = &summaries[0];
    assert_eq!(amani.total_advances, units(200));
    assert_eq!(amani.total_loans, units(2_000));
    assert_eq!(amani.total_cash, Money::ZERO);
    assert_eq!(amani.net_cash_remitted, units(-200));

    let baraka = &summaries[1];
    assert_eq!(baraka.total_cash, units(200));
    assert_eq!(baraka.total_mpesa, units(300));
    assert_eq!(baraka.total_loans, units(1_000));
    assert_eq!(baraka.total_fines, units(50));
    assert_eq!(baraka.office_cash, units(150));
    assert_eq!(baraka.net_cash_remitted, units(200 + 50 + 150));
    Ok(())
}

#[tokio::test]
async fn carry_forward_applies_unsynced_allocations() -> Result<()> {
    let ledger = util::ledger().await;
    let start = MemberBalances {
        savings: units(1_000),
        loan: units(5_000),
        advance: units(1_000),
        unallocated: Money::ZERO,
        total_outstanding: units(6_000),
    };
    util::seed_member(&ledger, "m-1", "g-1", start).await;

    ledger
        .add_record(collection(
            "m-1",
            900,
            0,
            vec![
                Allocation::new(AllocationKind::Savings, units(300)),
                Allocation::new(AllocationKind::Loan, units(500)),
                Allocation::other(units(100), "registration fee"),
            ],
        ))
        .await?;
    let advance = ledger
        .capture_advance_repayment("m-1", "Member m-1", units(1_000), units(200))
        .await?;
    let paid_advance = match &advance.payload {
        fieldledger_lib::RecordPayload::AdvanceLoan(p) => p.split.pay_advance,
        other => panic!("unexpected payload {other:?}"),
    };

    let projected = ledger.carry_forward("m-1").await?;
    assert_eq!(projected.savings, units(1_300));
    assert_eq!(projected.loan, units(4_500));
    assert_eq!(projected.advance, units(1_000) - paid_advance);
    assert_eq!(projected.unallocated, units(100));
    assert_eq!(projected.total_outstanding, units(5_500) - paid_advance);

    ledger.mark_synced(&advance.id).await?;
    let after_sync = ledger.carry_forward("m-1").await?;
    assert_eq!(after_sync.advance, units(1_000));

    let err = ledger.carry_forward("ghost").await.expect_err("unknown member");
    assert_eq!(err.code(), codes::NOT_FOUND);
    Ok(())
}
