//! Recompute jobs
//!
//! One run per entity class walks a fixed pipeline:
//!
//! ```text
//! Idle → ReadingSignals → Scoring → Ranking → ComputingVariation
//!      → CompactingHistory (reviews) → Persisting → Done | Failed
//! ```
//!
//! A run is `Failed` only when the signal read fails or the store is unreachable
//! before any write lands. Per-entity write failures are counted and the run
//! still finishes `Done`.

pub mod scheduler;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::PopularityCache;
use crate::config::JobConfig;
use crate::db::{RankingStore, SignalReader};
use crate::error::{PopularityError, Result};
use crate::metrics;
use crate::models::{
    EligibilityFilter, EntityClass, JobStats, PriorState, RankUpdate, RankedPreview,
    RecomputeOutcome, RunReport, RunStats, StoredRanking,
};
use crate::services::{
    assign_dense_ranks, variation, BatchPersister, BatchPersisterConfig, PersistReport,
    PopularityScorer, RankHistory, ScoredEntity, Variation, HISTORY_CAPACITY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    ReadingSignals,
    Scoring,
    Ranking,
    ComputingVariation,
    CompactingHistory,
    Persisting,
    Done,
    Failed,
}

/// One exclusive lock per entity class
pub struct RunLocks {
    anime: Arc<AsyncMutex<()>>,
    manga: Arc<AsyncMutex<()>>,
    review: Arc<AsyncMutex<()>>,
}

impl Default for RunLocks {
    fn default() -> Self {
        Self {
            anime: Arc::new(AsyncMutex::new(())),
            manga: Arc::new(AsyncMutex::new(())),
            review: Arc::new(AsyncMutex::new(())),
        }
    }
}

impl RunLocks {
    fn lock_for(&self, class: EntityClass) -> &Arc<AsyncMutex<()>> {
        match class {
            EntityClass::Anime => &self.anime,
            EntityClass::Manga => &self.manga,
            EntityClass::Review => &self.review,
        }
    }

    /// Claim the class without waiting.
    pub fn try_acquire(&self, class: EntityClass) -> Result<OwnedMutexGuard<()>> {
        self.lock_for(class)
            .clone()
            .try_lock_owned()
            .map_err(|_| PopularityError::AlreadyRunning(class))
    }
}

/// Engine knobs derived from [`JobConfig`]
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub page_size: usize,
    pub history_capacity: usize,
    pub min_catalog_ratings: i64,
    pub min_review_ratings: i64,
    pub persister: BatchPersisterConfig,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            history_capacity: HISTORY_CAPACITY,
            min_catalog_ratings: 0,
            min_review_ratings: 0,
            persister: BatchPersisterConfig::default(),
        }
    }
}

impl From<&JobConfig> for JobSettings {
    fn from(config: &JobConfig) -> Self {
        let defaults = BatchPersisterConfig::default();
        Self {
            page_size: config.page_size,
            history_capacity: config.history_capacity,
            min_catalog_ratings: config.min_catalog_ratings,
            min_review_ratings: config.min_review_ratings,
            persister: BatchPersisterConfig {
                batch_size: config.batch_size,
                batch_delay: config.batch_delay(),
                top_k: config.top_k,
                write_retry: resilience::RetryConfig {
                    max_retries: config.write_retries,
                    ..defaults.write_retry
                },
                write_timeout: config.write_timeout(),
            },
        }
    }
}

impl JobSettings {
    fn filter_for(&self, class: EntityClass) -> EligibilityFilter {
        let min_ratings = match class {
            EntityClass::Anime | EntityClass::Manga => self.min_catalog_ratings,
            EntityClass::Review => self.min_review_ratings,
        };
        EligibilityFilter { min_ratings }
    }
}

pub struct PopularityJob {
    reader: Arc<dyn SignalReader>,
    store: Arc<dyn RankingStore>,
    cache: PopularityCache,
    scorer: PopularityScorer,
    persister: BatchPersister,
    settings: JobSettings,
    locks: RunLocks,
    states: Mutex<HashMap<EntityClass, RunState>>,
    last_outcomes: Mutex<HashMap<EntityClass, RecomputeOutcome>>,
}

impl PopularityJob {
    pub fn new(
        reader: Arc<dyn SignalReader>,
        store: Arc<dyn RankingStore>,
        cache: PopularityCache,
        settings: JobSettings,
    ) -> Self {
        let persister = BatchPersister::new(store.clone(), settings.persister.clone());

        Self {
            reader,
            store,
            cache,
            scorer: PopularityScorer::new(),
            persister,
            settings,
            locks: RunLocks::default(),
            states: Mutex::new(HashMap::new()),
            last_outcomes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn recompute_anime_popularity(&self) -> RecomputeOutcome {
        self.recompute(EntityClass::Anime).await
    }

    pub async fn recompute_manga_popularity(&self) -> RecomputeOutcome {
        self.recompute(EntityClass::Manga).await
    }

    pub async fn recompute_review_rankings(&self) -> RecomputeOutcome {
        self.recompute(EntityClass::Review).await
    }

    /// Run the class and fold every failure into the outcome.
    pub async fn recompute(&self, class: EntityClass) -> RecomputeOutcome {
        self.execute(class)
            .await
            .unwrap_or_else(|e| RecomputeOutcome::failed(class, &e))
    }

    /// Like [`recompute`](Self::recompute), but an overlapping trigger comes
    /// back as `Err(AlreadyRunning)` so callers can tell it apart.
    pub async fn execute(&self, class: EntityClass) -> Result<RecomputeOutcome> {
        let outcome = match self.run(class).await {
            Ok(report) => RecomputeOutcome::completed(&report),
            Err(e @ PopularityError::AlreadyRunning(_)) => return Err(e),
            Err(e) => RecomputeOutcome::failed(class, &e),
        };

        self.cache.store_last_outcome(&outcome).await;
        self.last_outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class, outcome.clone());
        Ok(outcome)
    }

    /// Outcome of the latest finished run, from the cache when it has one,
    /// else from this process.
    pub async fn last_outcome(&self, class: EntityClass) -> Option<RecomputeOutcome> {
        if let Some(outcome) = self.cache.last_outcome(class).await {
            return Some(outcome);
        }
        self.last_outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .cloned()
    }

    pub async fn run(&self, class: EntityClass) -> Result<RunReport> {
        self.run_at(class, Utc::now().date_naive()).await
    }

    /// Full recompute of `class`, recording review trails under `today`.
    pub async fn run_at(&self, class: EntityClass, today: NaiveDate) -> Result<RunReport> {
        let _guard = match self.locks.try_acquire(class) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(class = %class, "Recompute already in progress, skipping trigger");
                metrics::record_run(class, "skipped");
                return Err(e);
            }
        };

        let run_id = Uuid::new_v4().to_string();
        let timer = Instant::now();

        info!(run_id = %run_id, class = %class, day = %today, "Starting popularity recompute");

        let result = self.run_pipeline(class, today, &run_id).await;
        let elapsed = timer.elapsed();
        metrics::record_run_duration(class, elapsed);

        match &result {
            Ok(report) => {
                self.set_state(class, RunState::Done);
                metrics::record_run(class, "success");
                metrics::set_entities_ranked(class, report.stats.total);
                metrics::record_write_errors(class, report.stats.errors);

                info!(
                    run_id = %run_id,
                    class = %class,
                    total = report.stats.total,
                    updated = report.stats.updated,
                    errors = report.stats.errors,
                    cleared = report.cleared,
                    duration_ms = elapsed.as_millis() as u64,
                    "Popularity recompute completed"
                );
            }
            Err(e) => {
                self.set_state(class, RunState::Failed);
                metrics::record_run(class, "error");

                error!(
                    run_id = %run_id,
                    class = %class,
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Popularity recompute failed"
                );
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        class: EntityClass,
        today: NaiveDate,
        run_id: &str,
    ) -> Result<RunReport> {
        let started_at = Utc::now();

        self.set_state(class, RunState::ReadingSignals);
        let filter = self.settings.filter_for(class);
        let rows = self
            .reader
            .read_all_signals(class, &filter, self.settings.page_size)
            .await?;

        info!(run_id = %run_id, class = %class, entities = rows.len(), "Signals read");

        self.set_state(class, RunState::Scoring);
        let scored: Vec<ScoredEntity> = rows
            .iter()
            .map(|row| ScoredEntity {
                id: row.id,
                score: self.scorer.score(&row.signals),
                tie_break: row.signals.tie_break(),
            })
            .collect();

        self.set_state(class, RunState::Ranking);
        let ranked = assign_dense_ranks(scored);

        self.set_state(class, RunState::ComputingVariation);
        let priors: HashMap<i64, PriorState> =
            rows.into_iter().map(|row| (row.id, row.prior)).collect();

        let mut updates: Vec<RankUpdate> = ranked
            .into_iter()
            .map(|entity| {
                let previous_rank = priors.get(&entity.id).map_or(0, |p| p.rank);
                RankUpdate {
                    id: entity.id,
                    score: entity.score,
                    rank: entity.rank,
                    variation: variation(entity.rank, previous_rank),
                    history: None,
                }
            })
            .collect();

        if class.keeps_history() {
            self.set_state(class, RunState::CompactingHistory);
            for update in &mut updates {
                let stored = priors.get(&update.id).and_then(|p| p.marker.as_deref());
                let trail = RankHistory::parse(stored).record(
                    today,
                    update.rank,
                    self.settings.history_capacity,
                );
                update.history = Some(trail);
            }
        }

        self.set_state(class, RunState::Persisting);
        let persisted = if updates.is_empty() {
            PersistReport::default()
        } else {
            self.store.ping().await?;
            self.persister.persist(class, &updates).await?
        };

        let ranked_ids: Vec<i64> = updates.iter().map(|u| u.id).collect();
        let cleared = match self.store.clear_stale_ranks(class, &ranked_ids).await {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    class = %class,
                    error = %e,
                    "Failed to clear ranks of no longer eligible entities"
                );
                0
            }
        };

        if class.keeps_history() {
            self.cache.invalidate_job_stats().await;
        }

        Ok(RunReport {
            run_id: run_id.to_string(),
            class,
            stats: RunStats {
                total: updates.len(),
                updated: persisted.updated,
                errors: persisted.errors,
            },
            top: persisted.top,
            cleared,
            started_at,
            completed_at: Utc::now(),
        })
    }

    /// Review coverage and the stored review top 10.
    pub async fn get_job_stats(&self) -> Result<JobStats> {
        if let Some(stats) = self.cache.job_stats().await {
            return Ok(stats);
        }

        let coverage = self.store.review_coverage().await?;
        let top10 = self
            .store
            .top_ranked(EntityClass::Review, self.settings.persister.top_k)
            .await?
            .iter()
            .map(stored_preview)
            .collect();

        let stats = JobStats::from_coverage(coverage, top10);
        self.cache.store_job_stats(&stats).await;
        Ok(stats)
    }

    pub fn current_state(&self, class: EntityClass) -> RunState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .copied()
            .unwrap_or(RunState::Idle)
    }

    fn set_state(&self, class: EntityClass, state: RunState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class, state);
    }
}

/// Preview of a stored review ranking; the marker comes from the trail, or from
/// a pre-trail marker when that is all the row holds.
fn stored_preview(stored: &StoredRanking) -> RankedPreview {
    let raw = stored.marker.as_deref();
    let marker = match RankHistory::parse(raw) {
        RankHistory::NoHistory => raw
            .and_then(Variation::parse_marker)
            .unwrap_or(Variation::New),
        trail => trail.latest_variation(),
    };

    RankedPreview {
        rank: stored.rank,
        id: stored.id,
        score: stored.score,
        variation: marker.to_string(),
    }
}
