//! Popularity Service
//!
//! Batch scoring and dense ranking of anime, manga and reviews. Each class is
//! recomputed independently: signals are read from Postgres, scored, ranked,
//! compared with the previous run and written back in concurrent batches.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;

pub use cache::PopularityCache;
pub use config::Config;
pub use error::{PopularityError, Result};
pub use jobs::{JobSettings, PopularityJob, RunState};
pub use models::{EntityClass, JobStats, RecomputeOutcome};
