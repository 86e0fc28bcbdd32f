pub mod scheduler;

pub use scheduler::{DiscoveryOutcome, SyncOutcome, SyncScheduler, SyncStatus};
