use anyhow::Result;
use fieldledger_lib::{
    error::codes,
    model::{AdvanceLoanPayload, Guarantor, LoanApplicationPayload, MemberBalances, MemberPayload},
    ErrorClass, RecordKind, RecordPayload,
};

#[path = "util.rs"]
mod util;

use util::{disbursement, savings_collection, units};

fn corrected(name: &str) -> MemberPayload {
    MemberPayload {
        name: name.into(),
        phone: Some("0799000111".into()),
        group_id: None,
    }
}

fn balances() -> MemberBalances {
    MemberBalances {
        savings: units(1_200),
        loan: units(3_000),
        advance: units(400),
        unallocated: units(0),
        total_outstanding: units(3_400),
    }
}

#[tokio::test]
async fn moves_member_records_and_loans() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_group(&ledger, "g-1", "Umoja").await;
    util::seed_member(&ledger, "tmp-7", "g-1", balances()).await;
    util::seed_loan(&ledger, "L-1", "tmp-7", Some("g-1")).await;

    let collection = ledger.add_record(savings_collection("tmp-7", 300)).await?;
    ledger.mark_synced(&collection).await?;
    let advance = ledger
        .capture_advance_repayment("tmp-7", "Temp", units(1_000), units(200))
        .await?;
    let payout = ledger.add_record(disbursement("L-1", "tmp-7", 2_000)).await?;
    let untouched = ledger.add_record(savings_collection("m-9", 50)).await?;

    let report = ledger
        .reassign_member_id("tmp-7", "M-1001", &corrected("Wanjiku Kamau"))
        .await?;
    assert!(report.member_moved);
    assert_eq!(report.records_rewritten, 3);
    assert_eq!(report.loans_rewritten, 1);

    assert!(ledger.get_member("tmp-7").await?.is_none());
    let member = ledger.get_member("M-1001").await?.expect("moved member");
    assert_eq!(member.name, "Wanjiku Kamau");
    assert_eq!(member.phone.as_deref(), Some("0799000111"));
    assert_eq!(member.group_id.as_deref(), Some("g-1"));
    assert_eq!(member.balances, balances());

    for id in [&collection, &advance.id, &payout] {
        let record = ledger.get_record(id).await?.expect("record kept");
        assert_eq!(record.payload.member_id(), Some("M-1001"));
    }
    match ledger.get_record(&advance.id).await?.expect("advance").payload {
        RecordPayload::AdvanceLoan(AdvanceLoanPayload { member_name, .. }) => {
            assert_eq!(member_name, "Wanjiku Kamau");
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(
        ledger.get_loan("L-1").await?.expect("loan").member_id,
        "M-1001"
    );
    let other = ledger.get_record(&untouched).await?.expect("other member");
    assert_eq!(other.payload.member_id(), Some("m-9"));

    assert!(!ledger.has_pending_record("tmp-7", RecordKind::AdvanceLoan).await?);
    assert!(ledger.has_pending_record("M-1001", RecordKind::AdvanceLoan).await?);
    Ok(())
}

#[tokio::test]
async fn rerunning_reassignment_is_a_noop() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_member(&ledger, "tmp-1", "g-1", balances()).await;
    ledger.add_record(savings_collection("tmp-1", 100)).await?;

    let first = ledger
        .reassign_member_id("tmp-1", "M-1", &corrected("Achieng"))
        .await?;
    assert!(!first.is_noop());

    let second = ledger
        .reassign_member_id("tmp-1", "M-1", &corrected("Achieng"))
        .await?;
    assert!(second.is_noop());
    assert_eq!(second.records_rewritten, 0);
    assert!(ledger.get_member("M-1").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn conflicting_ids_change_nothing() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_member(&ledger, "m-1", "g-1", balances()).await;
    util::seed_member(&ledger, "m-2", "g-1", MemberBalances::default()).await;
    let id = ledger.add_record(savings_collection("m-1", 100)).await?;

    let err = ledger
        .reassign_member_id("m-1", "m-2", &corrected("Someone"))
        .await
        .expect_err("both ids exist");
    assert_eq!(err.code(), codes::MEMBER_ID_CONFLICT);
    assert_eq!(err.class(), ErrorClass::InvariantViolation);

    assert_eq!(ledger.get_member("m-1").await?.expect("m-1").balances, balances());
    let record = ledger.get_record(&id).await?.expect("record");
    assert_eq!(record.payload.member_id(), Some("m-1"));
    Ok(())
}

#[tokio::test]
async fn rejects_unchanged_and_unknown_ids() -> Result<()> {
    let ledger = util::ledger().await;
    let err = ledger
        .reassign_member_id("m-1", "m-1", &corrected("Same"))
        .await
        .expect_err("same id");
    assert_eq!(err.code(), codes::MEMBER_ID_UNCHANGED);

    let err = ledger
        .reassign_member_id("ghost", "m-5", &corrected("Nobody"))
        .await
        .expect_err("nothing to move");
    assert_eq!(err.code(), codes::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn records_follow_even_without_a_member_row() -> Result<()> {
    let ledger = util::ledger().await;
    let id = ledger.add_record(savings_collection("offline-3", 100)).await?;

    let report = ledger
        .reassign_member_id("offline-3", "M-3", &corrected("Otieno"))
        .await?;
    assert!(!report.member_moved);
    assert_eq!(report.records_rewritten, 1);
    assert_eq!(
        ledger.get_record(&id).await?.expect("record").payload.member_id(),
        Some("M-3")
    );
    Ok(())
}

#[tokio::test]
async fn records_only_reassignment_can_be_rerun() -> Result<()> {
    let ledger = util::ledger().await;
    let id = ledger.add_record(savings_collection("offline-3", 100)).await?;

    let first = ledger
        .reassign_member_id("offline-3", "M-3", &corrected("Otieno"))
        .await?;
    assert_eq!(first.records_rewritten, 1);

    let second = ledger
        .reassign_member_id("offline-3", "M-3", &corrected("Otieno"))
        .await?;
    assert!(second.is_noop());
    assert_eq!(
        ledger.get_record(&id).await?.expect("record").payload.member_id(),
        Some("M-3")
    );
    Ok(())
}

fn application_guaranteed_by(borrower: &str, guarantor: &str) -> RecordPayload {
    RecordPayload::LoanApplication(LoanApplicationPayload {
        member_id: borrower.into(),
        member_name: format!("Member {borrower}"),
        loan_product: "normal".into(),
        amount: units(4_000),
        installments: 4,
        guarantors: vec![
            Guarantor {
                member_id: guarantor.into(),
                member_name: "Old Name".into(),
                amount: units(2_000),
            },
            Guarantor {
                member_id: "m-8".into(),
                member_name: "Member m-8".into(),
                amount: units(2_000),
            },
        ],
    })
}

#[tokio::test]
async fn guarantor_entries_follow_the_member() -> Result<()> {
    let ledger = util::ledger().await;
    util::seed_member(&ledger, "old-g", "g-1", balances()).await;
    let id = ledger
        .add_record(application_guaranteed_by("m-1", "old-g"))
        .await?;

    let report = ledger
        .reassign_member_id("old-g", "NEW-G", &corrected("Mwangi"))
        .await?;
    assert!(report.member_moved);
    assert_eq!(report.records_rewritten, 1);

    let record = ledger.get_record(&id).await?.expect("application");
    assert_eq!(record.payload.member_id(), Some("m-1"));
    assert!(ledger.has_pending_record("m-1", RecordKind::LoanApplication).await?);
    match record.payload {
        RecordPayload::LoanApplication(p) => {
            assert_eq!(p.member_name, "Member m-1");
            assert_eq!(p.guarantors[0].member_id, "NEW-G");
            assert_eq!(p.guarantors[0].member_name, "Mwangi");
            assert_eq!(p.guarantors[1].member_id, "m-8");
        }
        other => panic!("unexpected payload {other:?}"),
    }

    let again = ledger
        .reassign_member_id("old-g", "NEW-G", &corrected("Mwangi"))
        .await?;
    assert!(again.is_noop());
    Ok(())
}

#[tokio::test]
async fn guarantor_only_reference_is_enough_to_rerun() -> Result<()> {
    let ledger = util::ledger().await;
    ledger
        .add_record(application_guaranteed_by("m-1", "offline-g"))
        .await?;

    let first = ledger
        .reassign_member_id("offline-g", "M-9", &corrected("Chebet"))
        .await?;
    assert!(!first.member_moved);
    assert_eq!(first.records_rewritten, 1);

    let second = ledger
        .reassign_member_id("offline-g", "M-9", &corrected("Chebet"))
        .await?;
    assert!(second.is_noop());
    Ok(())
}
