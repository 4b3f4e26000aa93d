//! Dead-letter store for entries that could not be persisted.
//!
//! Entries whose batch exhausted every flush attempt are written as JSON
//! Lines to a size-rotated set of files for later inspection and replay.
//!
//! # Components
//!
//! - [`DeadLetterStore`] - Append, read-back, rotation, stats and retry sweep
//! - [`DeadLetterEntry`] - One failed entry with its failure context

mod store;
mod types;

pub use store::DeadLetterStore;
pub use types::{
    DeadLetterEntry, DeadLetterStats, REASON_INVALID_ENTRY, REASON_MAX_RETRIES, RetrySweepReport,
};
