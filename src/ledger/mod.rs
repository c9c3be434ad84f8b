// Per-plan transaction ledger
pub mod models;

pub use models::{DepositType, TransactionEntry, TransactionLedger, TransactionStatus};
