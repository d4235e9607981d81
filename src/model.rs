use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef},
    Sqlite,
};
use thiserror::Error;

use crate::advance::AdvancePaymentSplit;
use crate::money::Money;

/// Kind of locally captured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Collection,
    LoanApplication,
    AdvanceLoan,
    LoanDisbursement,
    GroupCollection,
    NewMember,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Collection,
        RecordKind::LoanApplication,
        RecordKind::AdvanceLoan,
        RecordKind::LoanDisbursement,
        RecordKind::GroupCollection,
        RecordKind::NewMember,
    ];

    /// Kinds whose records are keyed to a member and follow member id changes.
    pub const MEMBER_KEYED: [RecordKind; 4] = [
        RecordKind::Collection,
        RecordKind::LoanApplication,
        RecordKind::AdvanceLoan,
        RecordKind::LoanDisbursement,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Collection => "collection",
            RecordKind::LoanApplication => "loan_application",
            RecordKind::AdvanceLoan => "advance_loan",
            RecordKind::LoanDisbursement => "loan_disbursement",
            RecordKind::GroupCollection => "group_collection",
            RecordKind::NewMember => "new_member",
        }
    }

    pub fn iter() -> impl Iterator<Item = RecordKind> {
        Self::ALL.into_iter()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid record kind: {value}")]
pub struct RecordKindError {
    value: String,
}

impl RecordKindError {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FromStr for RecordKind {
    type Err = RecordKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RecordKindError::new(s))
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronization state of a record against the remote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    /// Pending and failed records still need to reach the remote ledger.
    pub const fn is_unsynced(self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! sqlite_text_enum {
    ($ty:ty, $label:literal) => {
        impl sqlx::Type<Sqlite> for $ty {
            fn type_info() -> SqliteTypeInfo {
                <&str as sqlx::Type<Sqlite>>::type_info()
            }

            fn compatible(ty: &SqliteTypeInfo) -> bool {
                <&str as sqlx::Type<Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<SqliteArgumentValue<'q>>,
            ) -> Result<IsNull, BoxDynError> {
                <&str as sqlx::Encode<'q, Sqlite>>::encode_by_ref(&self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, Sqlite> for $ty {
            fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
                let raw = <&str as sqlx::Decode<'r, Sqlite>>::decode(value)?;
                <$ty>::from_str_opt(raw)
                    .ok_or_else(|| format!(concat!("invalid ", $label, ": {}"), raw).into())
            }
        }
    };
}

impl RecordKind {
    fn from_str_opt(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl SyncStatus {
    fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

sqlite_text_enum!(RecordKind, "record kind");
sqlite_text_enum!(SyncStatus, "sync status");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    Savings,
    Loan,
    AdvancePayment,
    Other,
}

/// A portion of a collected payment routed to one purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    #[serde(rename = "type", alias = "kind")]
    pub kind: AllocationKind,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Allocation {
    pub fn new(kind: AllocationKind, amount: Money) -> Self {
        Self {
            kind,
            amount,
            reason: None,
        }
    }

    pub fn other(amount: Money, reason: impl Into<String>) -> Self {
        Self {
            kind: AllocationKind::Other,
            amount,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPayload {
    #[serde(alias = "memberId")]
    pub member_id: String,
    #[serde(alias = "memberName")]
    pub member_name: String,
    #[serde(alias = "totalAmount")]
    pub total_amount: Money,
    #[serde(alias = "cashAmount")]
    pub cash_amount: Money,
    #[serde(alias = "mpesaAmount")]
    pub mpesa_amount: Money,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
}

impl CollectionPayload {
    pub fn allocated(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn allocated_to(&self, kind: AllocationKind) -> Money {
        self.allocations
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guarantor {
    #[serde(alias = "memberId")]
    pub member_id: String,
    #[serde(alias = "memberName")]
    pub member_name: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApplicationPayload {
    #[serde(alias = "memberId")]
    pub member_id: String,
    #[serde(alias = "memberName")]
    pub member_name: String,
    #[serde(alias = "loanProduct")]
    pub loan_product: String,
    pub amount: Money,
    pub installments: u32,
    #[serde(default)]
    pub guarantors: Vec<Guarantor>,
}

/// An advance-loan repayment with the split computed at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceLoanPayload {
    #[serde(alias = "memberId")]
    pub member_id: String,
    #[serde(alias = "memberName")]
    pub member_name: String,
    pub amount: Money,
    #[serde(alias = "currentBalance")]
    pub current_balance: Money,
    pub split: AdvancePaymentSplit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDisbursementPayload {
    #[serde(alias = "loanId")]
    pub loan_id: String,
    #[serde(alias = "memberId")]
    pub member_id: String,
    #[serde(alias = "requestedAmount")]
    pub requested_amount: Money,
    #[serde(alias = "selectedAmount")]
    pub selected_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCollectionPayload {
    #[serde(alias = "groupId")]
    pub group_id: String,
    #[serde(alias = "groupName")]
    pub group_name: String,
    #[serde(alias = "cashCollected")]
    pub cash_collected: Money,
    #[serde(alias = "finesCollected")]
    pub fines_collected: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMemberPayload {
    pub name: String,
    pub phone: String,
    #[serde(default, alias = "nationalId")]
    pub national_id: Option<String>,
    #[serde(alias = "groupId")]
    pub group_id: String,
}

/// Kind-specific body of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RecordPayload {
    Collection(CollectionPayload),
    LoanApplication(LoanApplicationPayload),
    AdvanceLoan(AdvanceLoanPayload),
    LoanDisbursement(LoanDisbursementPayload),
    GroupCollection(GroupCollectionPayload),
    NewMember(NewMemberPayload),
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::Collection(_) => RecordKind::Collection,
            RecordPayload::LoanApplication(_) => RecordKind::LoanApplication,
            RecordPayload::AdvanceLoan(_) => RecordKind::AdvanceLoan,
            RecordPayload::LoanDisbursement(_) => RecordKind::LoanDisbursement,
            RecordPayload::GroupCollection(_) => RecordKind::GroupCollection,
            RecordPayload::NewMember(_) => RecordKind::NewMember,
        }
    }

    pub fn member_id(&self) -> Option<&str> {
        match self {
            RecordPayload::Collection(p) => Some(&p.member_id),
            RecordPayload::LoanApplication(p) => Some(&p.member_id),
            RecordPayload::AdvanceLoan(p) => Some(&p.member_id),
            RecordPayload::LoanDisbursement(p) => Some(&p.member_id),
            RecordPayload::GroupCollection(_) | RecordPayload::NewMember(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            RecordPayload::GroupCollection(p) => Some(&p.group_id),
            RecordPayload::NewMember(p) => Some(&p.group_id),
            _ => None,
        }
    }

    pub fn loan_id(&self) -> Option<&str> {
        match self {
            RecordPayload::LoanDisbursement(p) => Some(&p.loan_id),
            _ => None,
        }
    }

    /// Points a member-keyed payload at `member_id`, refreshing the denormalised name.
    /// Returns false for payloads that carry no member reference.
    pub fn reassign_member(&mut self, member_id: &str, member_name: &str) -> bool {
        let (id, name) = match self {
            RecordPayload::Collection(p) => (&mut p.member_id, Some(&mut p.member_name)),
            RecordPayload::LoanApplication(p) => (&mut p.member_id, Some(&mut p.member_name)),
            RecordPayload::AdvanceLoan(p) => (&mut p.member_id, Some(&mut p.member_name)),
            RecordPayload::LoanDisbursement(p) => (&mut p.member_id, None),
            RecordPayload::GroupCollection(_) | RecordPayload::NewMember(_) => return false,
        };
        *id = member_id.to_string();
        if let Some(name) = name {
            *name = member_name.to_string();
        }
        true
    }

    /// Points every guarantor entry naming `old_id` at `new_id`. Returns whether any
    /// entry changed.
    pub fn reassign_guarantor(&mut self, old_id: &str, new_id: &str, member_name: &str) -> bool {
        let RecordPayload::LoanApplication(p) = self else {
            return false;
        };
        let mut changed = false;
        for guarantor in p.guarantors.iter_mut().filter(|g| g.member_id == old_id) {
            guarantor.member_id = new_id.to_string();
            guarantor.member_name = member_name.to_string();
            changed = true;
        }
        changed
    }

    pub fn has_guarantor(&self, member_id: &str) -> bool {
        match self {
            RecordPayload::LoanApplication(p) => {
                p.guarantors.iter().any(|g| g.member_id == member_id)
            }
            _ => false,
        }
    }
}

/// Lifecycle envelope shared by every record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub payload: RecordPayload,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBalances {
    pub savings: Money,
    pub loan: Money,
    pub advance: Money,
    pub unallocated: Money,
    pub total_outstanding: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "groupId")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub balances: MemberBalances,
}

/// Corrected member details applied during an id reassignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPayload {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "groupId")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: String,
    #[serde(alias = "memberId")]
    pub member_id: String,
    #[serde(default, alias = "groupId")]
    pub group_id: Option<String>,
    pub principal: Money,
}

/// Per-group rollup of unsynced activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: String,
    pub group_name: String,
    pub total_cash: Money,
    pub total_mpesa: Money,
    pub total_advances: Money,
    pub total_loans: Money,
    pub total_fines: Money,
    pub office_cash: Money,
    pub net_cash_remitted: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_str() {
        for kind in RecordKind::iter() {
            let parsed = RecordKind::from_str(kind.as_str()).expect("parse");
            assert_eq!(kind, parsed);
            assert_eq!(kind.as_str(), parsed.to_string());
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = RecordKind::from_str("expense").unwrap_err();
        assert_eq!(err.value(), "expense");
    }

    #[test]
    fn payload_tag_matches_kind() {
        let payload = RecordPayload::GroupCollection(GroupCollectionPayload {
            group_id: "g-1".into(),
            group_name: "Umoja".into(),
            cash_collected: Money::from_units(100),
            fines_collected: Money::from_units(20),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "group_collection");
        assert_eq!(json["data"]["fines_collected"], 2000);
        assert_eq!(payload.group_id(), Some("g-1"));
        assert_eq!(payload.member_id(), None);
    }

    #[test]
    fn accepts_camel_case_aliases() {
        let raw = r#"{"kind":"collection","data":{"memberId":"m-1","memberName":"Wanjiru",
            "totalAmount":1000,"cashAmount":600,"mpesaAmount":400,
            "allocations":[{"type":"savings","amount":1000}]}}"#;
        let payload: RecordPayload = serde_json::from_str(raw).unwrap();
        match payload {
            RecordPayload::Collection(c) => {
                assert_eq!(c.member_id, "m-1");
                assert_eq!(c.allocated_to(AllocationKind::Savings), Money::from_cents(1000));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn reassign_member_touches_only_member_keyed_payloads() {
        let mut group = RecordPayload::NewMember(NewMemberPayload {
            name: "Otieno".into(),
            phone: "0712345678".into(),
            national_id: None,
            group_id: "g-1".into(),
        });
        assert!(!group.reassign_member("m-2", "New"));

        let mut collection = RecordPayload::Collection(CollectionPayload {
            member_id: "m-1".into(),
            member_name: "Old".into(),
            total_amount: Money::ZERO,
            cash_amount: Money::ZERO,
            mpesa_amount: Money::ZERO,
            allocations: Vec::new(),
        });
        assert!(collection.reassign_member("m-2", "New"));
        assert_eq!(collection.member_id(), Some("m-2"));
    }
}
