// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod clients;
pub mod config;
pub mod dedup;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod relevance;
pub mod runloop;
pub mod sched;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::Config;
pub use crate::dedup::DuplicateGuard;
pub use crate::ingest::{IngestionTracker, NewsItem, NewsSource, SourceError};
pub use crate::pipeline::{Poster, PublishOutcome};
pub use crate::relevance::RelevanceEngine;
pub use crate::sched::{PriceSlot, PublicationScheduler, SchedulerConfig, SchedulerState};
pub use crate::store::{StateSnapshot, StateStore};
