pub mod bootstrap;
pub mod config;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod plan;
pub mod settlement;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use error::{AppError, AppResult};
