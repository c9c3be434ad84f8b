pub mod memory;
pub mod models;
pub mod repository;
pub mod schedule;
pub mod service;

pub use memory::InMemoryPlanStore;
pub use models::{CreatePlanRequest, LockType, PlanConfig, PlanState, SavingPlan};
pub use repository::{PgPlanStore, PlanStore};
pub use schedule::{next_fire_time, Interval};
pub use service::PlanService;
