// Scheduling and at-most-one execution per plan
pub mod guard;
pub mod scheduler;

pub use guard::{InFlightGuard, InFlightPermit};
pub use scheduler::{ScheduleConfig, ScheduleCoordinator, ScheduledRun, SkipReason, SweepReport, Trigger};
