//! Offline-first field ledger for savings groups: captures collections, loan activity and
//! member changes on the device, validates them, and tracks each record until the remote
//! ledger accepts it.

pub mod advance;
pub mod aggregate;
pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod ledger;
pub mod lifecycle;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod money;
pub mod repo;
pub mod sync;
pub mod time;
pub mod validation;

pub use advance::{AdvancePaymentSplit, SplitTerms};
pub use config::LedgerConfig;
pub use error::{AppError, AppResult, ErrorClass};
pub use ledger::{BulkOutcome, Ledger};
pub use lifecycle::Transition;
pub use model::{
    Allocation, AllocationKind, GroupSummary, MemberBalances, Record, RecordKind, RecordPayload,
    SyncStatus,
};
pub use money::Money;
pub use sync::{LedgerClient, SyncReport};
