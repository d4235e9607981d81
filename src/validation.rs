//! Pre-save checks. Every function here is a predicate over its inputs and the current
//! store; none of them write.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;

use crate::{
    advance::{self, SplitTerms},
    error::codes,
    model::{
        AdvanceLoanPayload, AllocationKind, CollectionPayload, GroupCollectionPayload,
        LoanApplicationPayload, LoanDisbursementPayload, NewMemberPayload, Record, RecordKind,
        RecordPayload,
    },
    money::Money,
    repo,
    time::local_day_bounds,
    AppError, AppResult,
};

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{9,15}$").expect("phone validation pattern to compile"));

const MAX_INSTALLMENTS: u32 = 120;

/// Collected and allocated totals must agree to within a cent.
pub fn validate_balance(collected: Money, allocated: Money) -> AppResult<()> {
    if collected.approx_eq(allocated) {
        return Ok(());
    }
    let difference = collected - allocated;
    let message = if difference.is_positive() {
        format!("{difference} of the amount collected has not been allocated.")
    } else {
        format!("Allocations exceed the amount collected by {}.", difference.abs())
    };
    Err(AppError::new(codes::ALLOCATION_MISMATCH, message)
        .with_context("collected", collected.to_string())
        .with_context("allocated", allocated.to_string())
        .with_context("difference", difference.to_string()))
}

fn require_text(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::new(codes::FIELD_REQUIRED, format!("{field} is required."))
            .with_context("field", field.to_string()));
    }
    Ok(())
}

fn require_non_negative(amount: Money, field: &str) -> AppResult<()> {
    if amount.is_negative() {
        return Err(
            AppError::new(codes::NEGATIVE_AMOUNT, format!("{field} cannot be negative."))
                .with_context("field", field.to_string())
                .with_context("amount", amount.to_string()),
        );
    }
    Ok(())
}

fn require_positive(amount: Money, field: &str) -> AppResult<()> {
    if !amount.is_positive() {
        return Err(
            AppError::new(codes::AMOUNT_REQUIRED, format!("{field} must be greater than zero."))
                .with_context("field", field.to_string())
                .with_context("amount", amount.to_string()),
        );
    }
    Ok(())
}

pub fn validate_collection(payload: &CollectionPayload) -> AppResult<()> {
    require_text(&payload.member_id, "member_id")?;
    require_non_negative(payload.cash_amount, "cash_amount")?;
    require_non_negative(payload.mpesa_amount, "mpesa_amount")?;

    let tendered = payload.cash_amount + payload.mpesa_amount;
    if !payload.total_amount.approx_eq(tendered) {
        return Err(AppError::new(
            codes::PAYMENT_SPLIT_MISMATCH,
            "Cash and M-Pesa amounts must add up to the total collected.",
        )
        .with_context("total", payload.total_amount.to_string())
        .with_context("cash", payload.cash_amount.to_string())
        .with_context("mpesa", payload.mpesa_amount.to_string()));
    }

    for (index, allocation) in payload.allocations.iter().enumerate() {
        require_non_negative(allocation.amount, "allocation amount")
            .map_err(|err| err.with_context("index", index.to_string()))?;
        if allocation.kind == AllocationKind::Other
            && allocation
                .reason
                .as_deref()
                .map_or(true, |reason| reason.trim().is_empty())
        {
            return Err(AppError::new(
                codes::REASON_REQUIRED,
                "Allocations to 'other' need a reason.",
            )
            .with_context("index", index.to_string()));
        }
    }

    validate_balance(payload.total_amount, payload.allocated())
}

fn validate_loan_application(payload: &LoanApplicationPayload) -> AppResult<()> {
    require_text(&payload.member_id, "member_id")?;
    require_text(&payload.loan_product, "loan_product")?;
    require_positive(payload.amount, "amount")?;
    if payload.installments == 0 || payload.installments > MAX_INSTALLMENTS {
        return Err(AppError::new(
            codes::INVALID_INSTALLMENTS,
            format!("Installments must be between 1 and {MAX_INSTALLMENTS}."),
        )
        .with_context("installments", payload.installments.to_string()));
    }
    for guarantor in &payload.guarantors {
        require_text(&guarantor.member_id, "guarantor member_id")?;
        require_non_negative(guarantor.amount, "guarantor amount")?;
    }
    Ok(())
}

/// The stored split must be the one `terms` produce for this balance and payment.
fn validate_advance_loan(payload: &AdvanceLoanPayload, terms: &SplitTerms) -> AppResult<()> {
    require_text(&payload.member_id, "member_id")?;
    require_positive(payload.amount, "amount")?;
    let expected = advance::split_with_terms(payload.current_balance, payload.amount, terms);
    if !expected.is_valid || !payload.split.is_valid {
        let message = if expected.is_valid {
            payload.split.message.clone()
        } else {
            expected.message
        };
        return Err(AppError::new(codes::ADVANCE_PAYMENT_INVALID, message)
            .with_context("amount", payload.amount.to_string())
            .with_context("balance", payload.current_balance.to_string()));
    }
    let stored = &payload.split;
    if stored.pay_advance != expected.pay_advance
        || stored.pay_advance_interest != expected.pay_advance_interest
        || stored.remaining_balance != expected.remaining_balance
    {
        return Err(AppError::new(
            codes::ADVANCE_SPLIT_MISMATCH,
            "The repayment split does not match the amount paid against this balance.",
        )
        .with_context("amount", payload.amount.to_string())
        .with_context("balance", payload.current_balance.to_string())
        .with_context("pay_advance", stored.pay_advance.to_string())
        .with_context("expected_pay_advance", expected.pay_advance.to_string()));
    }
    Ok(())
}

fn validate_disbursement(payload: &LoanDisbursementPayload) -> AppResult<()> {
    require_text(&payload.loan_id, "loan_id")?;
    require_positive(payload.selected_amount, "selected_amount")?;
    if payload.selected_amount > payload.requested_amount {
        return Err(AppError::new(
            codes::DISBURSEMENT_EXCEEDS_REQUEST,
            "The disbursed amount cannot exceed the amount requested.",
        )
        .with_context("requested", payload.requested_amount.to_string())
        .with_context("selected", payload.selected_amount.to_string()));
    }
    Ok(())
}

fn validate_group_collection(payload: &GroupCollectionPayload) -> AppResult<()> {
    require_text(&payload.group_id, "group_id")?;
    require_non_negative(payload.cash_collected, "cash_collected")?;
    require_non_negative(payload.fines_collected, "fines_collected")?;
    require_positive(
        payload.cash_collected + payload.fines_collected,
        "group collection total",
    )
}

fn validate_new_member(payload: &NewMemberPayload) -> AppResult<()> {
    require_text(&payload.name, "name")?;
    require_text(&payload.group_id, "group_id")?;
    let phone = payload.phone.trim();
    if !PHONE_PATTERN.is_match(phone) {
        return Err(
            AppError::new(codes::INVALID_PHONE, "Phone numbers must be 9 to 15 digits.")
                .with_context("phone", phone.to_string()),
        );
    }
    Ok(())
}

/// Field-level checks for any record payload. Advance-loan splits are checked against
/// `terms`.
pub fn validate_payload(payload: &RecordPayload, terms: &SplitTerms) -> AppResult<()> {
    match payload {
        RecordPayload::Collection(p) => validate_collection(p),
        RecordPayload::LoanApplication(p) => validate_loan_application(p),
        RecordPayload::AdvanceLoan(p) => validate_advance_loan(p, terms),
        RecordPayload::LoanDisbursement(p) => validate_disbursement(p),
        RecordPayload::GroupCollection(p) => validate_group_collection(p),
        RecordPayload::NewMember(p) => validate_new_member(p),
    }
}

/// Single-entry rule: at most one pending or failed record per member and kind.
pub async fn validate_no_duplicate_pending(
    pool: &SqlitePool,
    member_id: &str,
    kind: RecordKind,
) -> AppResult<()> {
    if repo::has_pending_record(pool, member_id, kind).await? {
        return Err(repo::duplicate_pending(member_id, kind));
    }
    Ok(())
}

/// Bulk-entry rule: records for the same member and kind captured on the same local
/// calendar day as `at_ms`. Advisory only.
pub async fn same_day_duplicates(
    pool: &SqlitePool,
    member_id: &str,
    kind: RecordKind,
    at_ms: i64,
) -> AppResult<Vec<Record>> {
    let (start, end) = local_day_bounds(at_ms);
    repo::member_records_between(pool, member_id, kind, start, end).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Allocation;

    fn check(payload: &RecordPayload) -> AppResult<()> {
        validate_payload(payload, &SplitTerms::default())
    }

    fn units(v: i64) -> Money {
        Money::from_units(v)
    }

    fn collection(cash: i64, mpesa: i64, allocations: Vec<Allocation>) -> CollectionPayload {
        CollectionPayload {
            member_id: "m-1".into(),
            member_name: "Achieng".into(),
            total_amount: units(cash + mpesa),
            cash_amount: units(cash),
            mpesa_amount: units(mpesa),
            allocations,
        }
    }

    #[test]
    fn balance_within_a_cent_passes() {
        assert!(validate_balance(units(100), units(100)).is_ok());
        assert!(validate_balance(units(100), units(100) - Money::from_cents(1)).is_ok());
    }

    #[test]
    fn balance_mismatch_reports_difference() {
        let err = validate_balance(units(100), units(90)).unwrap_err();
        assert_eq!(err.code(), codes::ALLOCATION_MISMATCH);
        assert_eq!(err.context().get("difference").map(String::as_str), Some("10.00"));

        let over = validate_balance(units(90), units(100)).unwrap_err();
        assert_eq!(over.context().get("difference").map(String::as_str), Some("-10.00"));
        assert!(over.message().contains("exceed"));
    }

    #[test]
    fn collection_requires_tender_to_match_total() {
        let mut payload = collection(600, 400, vec![Allocation::new(AllocationKind::Savings, units(1000))]);
        assert!(validate_collection(&payload).is_ok());
        payload.total_amount = units(1200);
        let err = validate_collection(&payload).unwrap_err();
        assert_eq!(err.code(), codes::PAYMENT_SPLIT_MISMATCH);
    }

    #[test]
    fn other_allocation_needs_reason() {
        let payload = collection(
            100,
            0,
            vec![Allocation {
                kind: AllocationKind::Other,
                amount: units(100),
                reason: Some("  ".into()),
            }],
        );
        let err = validate_collection(&payload).unwrap_err();
        assert_eq!(err.code(), codes::REASON_REQUIRED);

        let ok = collection(100, 0, vec![Allocation::other(units(100), "registration fee")]);
        assert!(validate_collection(&ok).is_ok());
    }

    #[test]
    fn negative_allocation_is_rejected() {
        let payload = collection(
            100,
            0,
            vec![
                Allocation::new(AllocationKind::Savings, units(150)),
                Allocation::new(AllocationKind::Loan, units(-50)),
            ],
        );
        let err = validate_collection(&payload).unwrap_err();
        assert_eq!(err.code(), codes::NEGATIVE_AMOUNT);
        assert_eq!(err.context().get("index").map(String::as_str), Some("1"));
    }

    #[test]
    fn unallocated_collection_is_rejected() {
        let payload = collection(100, 0, vec![Allocation::new(AllocationKind::Savings, units(60))]);
        let err = validate_collection(&payload).unwrap_err();
        assert_eq!(err.code(), codes::ALLOCATION_MISMATCH);
    }

    #[test]
    fn advance_loan_requires_valid_split() {
        let payload = RecordPayload::AdvanceLoan(AdvanceLoanPayload {
            member_id: "m-1".into(),
            member_name: "Achieng".into(),
            amount: units(2000),
            current_balance: units(1000),
            split: advance::split(units(1000), units(2000)),
        });
        let err = check(&payload).unwrap_err();
        assert_eq!(err.code(), codes::ADVANCE_PAYMENT_INVALID);
    }

    #[test]
    fn advance_loan_split_must_match_the_payment() {
        let mut payload = AdvanceLoanPayload {
            member_id: "m-1".into(),
            member_name: "Achieng".into(),
            amount: units(50),
            current_balance: units(10_000),
            split: advance::split(units(10_000), units(9_000)),
        };
        let err = check(&RecordPayload::AdvanceLoan(payload.clone())).unwrap_err();
        assert_eq!(err.code(), codes::ADVANCE_SPLIT_MISMATCH);

        payload.split = advance::split(units(10_000), units(50));
        assert!(check(&RecordPayload::AdvanceLoan(payload.clone())).is_ok());

        let cheaper = SplitTerms {
            rate_bps: 500,
            fee: Money::ZERO,
        };
        payload.amount = units(5_000);
        payload.split = advance::split(units(10_000), units(5_000));
        let err = validate_payload(&RecordPayload::AdvanceLoan(payload), &cheaper).unwrap_err();
        assert_eq!(err.code(), codes::ADVANCE_SPLIT_MISMATCH);
    }

    #[test]
    fn disbursement_cannot_exceed_request() {
        let payload = RecordPayload::LoanDisbursement(LoanDisbursementPayload {
            loan_id: "l-1".into(),
            member_id: "m-1".into(),
            requested_amount: units(5000),
            selected_amount: units(6000),
        });
        let err = check(&payload).unwrap_err();
        assert_eq!(err.code(), codes::DISBURSEMENT_EXCEEDS_REQUEST);
    }

    #[test]
    fn loan_application_checks_installments() {
        let payload = RecordPayload::LoanApplication(LoanApplicationPayload {
            member_id: "m-1".into(),
            member_name: "Achieng".into(),
            loan_product: "normal".into(),
            amount: units(10_000),
            installments: 0,
            guarantors: Vec::new(),
        });
        let err = check(&payload).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_INSTALLMENTS);
    }

    #[test]
    fn new_member_phone_format() {
        let mut payload = NewMemberPayload {
            name: "Kamau".into(),
            phone: "0712345678".into(),
            national_id: None,
            group_id: "g-1".into(),
        };
        assert!(check(&RecordPayload::NewMember(payload.clone())).is_ok());
        payload.phone = "07-12".into();
        let err = check(&RecordPayload::NewMember(payload)).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_PHONE);
    }

    #[test]
    fn empty_group_collection_is_rejected() {
        let payload = RecordPayload::GroupCollection(GroupCollectionPayload {
            group_id: "g-1".into(),
            group_name: "Umoja".into(),
            cash_collected: Money::ZERO,
            fines_collected: Money::ZERO,
        });
        let err = check(&payload).unwrap_err();
        assert_eq!(err.code(), codes::AMOUNT_REQUIRED);
    }
}
