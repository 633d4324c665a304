// Scheduler module: the per-pass engine and the timer that drives it

pub mod engine;
pub mod runner;

pub use engine::{PassSummary, ScheduleEngine};
pub use runner::{ConfigResources, PassRunner, ResourceProvider, Scheduler, StaticResources};
