// File-backed persistence for action history and autoscale baselines

pub mod baseline;
pub mod file_store;
pub mod history;

pub use baseline::AutoscaleBaselineStore;
pub use file_store::JsonFileStore;
pub use history::{fingerprint, ActionHistoryStore};
