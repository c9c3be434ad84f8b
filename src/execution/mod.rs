pub mod chain;
pub mod executor;
pub mod relay;

pub use chain::{DepositReceipt, OpenPoolReceipt, OpenPoolRequest, PoolState, SettlementLayer};
pub use executor::SettlementExecutor;
pub use relay::{RelayConfig, RelaySettlementLayer};
