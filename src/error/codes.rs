//! Error codes surfaced by the ledger core.

pub const NOT_FOUND: &str = "LEDGER/NOT_FOUND";
pub const KIND_MISMATCH: &str = "LEDGER/KIND_MISMATCH";
pub const DECODE_ERROR: &str = "LEDGER/DECODE";
pub const MEMBER_IMMUTABLE: &str = "LEDGER/MEMBER_IMMUTABLE";

pub const ALLOCATION_MISMATCH: &str = "VALIDATION/ALLOCATION_MISMATCH";
pub const PAYMENT_SPLIT_MISMATCH: &str = "VALIDATION/PAYMENT_SPLIT_MISMATCH";
pub const NEGATIVE_AMOUNT: &str = "VALIDATION/NEGATIVE_AMOUNT";
pub const AMOUNT_REQUIRED: &str = "VALIDATION/AMOUNT_REQUIRED";
pub const REASON_REQUIRED: &str = "VALIDATION/REASON_REQUIRED";
pub const DUPLICATE_PENDING: &str = "VALIDATION/DUPLICATE_PENDING";
pub const FIELD_REQUIRED: &str = "VALIDATION/FIELD_REQUIRED";
pub const INVALID_PHONE: &str = "VALIDATION/INVALID_PHONE";
pub const INVALID_INSTALLMENTS: &str = "VALIDATION/INVALID_INSTALLMENTS";
pub const DISBURSEMENT_EXCEEDS_REQUEST: &str = "VALIDATION/DISBURSEMENT_EXCEEDS_REQUEST";
pub const ADVANCE_PAYMENT_INVALID: &str = "VALIDATION/ADVANCE_PAYMENT_INVALID";
pub const ADVANCE_SPLIT_MISMATCH: &str = "VALIDATION/ADVANCE_SPLIT_MISMATCH";

pub const REMOTE_REJECTED: &str = "SYNC/REMOTE_REJECTED";

pub const STALE_RESULT: &str = "LIFECYCLE/STALE_RESULT";
pub const SYNCED_IMMUTABLE: &str = "LIFECYCLE/SYNCED_IMMUTABLE";
pub const REOPEN_DISABLED: &str = "LIFECYCLE/REOPEN_DISABLED";

pub const MEMBER_ID_CONFLICT: &str = "INVARIANT/MEMBER_ID_CONFLICT";
pub const MEMBER_ID_UNCHANGED: &str = "VALIDATION/MEMBER_ID_UNCHANGED";
pub const INCONSISTENT_STATE: &str = "INVARIANT/INCONSISTENT_STATE";

pub const CONFIG_INVALID: &str = "CONFIG/INVALID";
