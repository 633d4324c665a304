// Common library for the scheduled action engine and its tools

pub mod bootstrap;
pub mod calendar;
pub mod condition;
pub mod config;
pub mod errors;
pub mod executor;
pub mod models;
pub mod resource_id;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
