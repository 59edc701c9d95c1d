pub mod error;
pub mod generator;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod topics;

pub use error::DigestError;
pub use scheduler::{DigestScheduler, SchedulerConfig, TestGeneration, TickOutcome};
