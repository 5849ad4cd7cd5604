// ============================================
// Batch Persister
// ============================================
//
// Writes computed rankings back to storage in fixed-size chunks.
//
// - Writes inside a chunk run concurrently; chunks run one after another with
//   an optional pause in between to keep database load bounded.
// - Every write gets its own timeout and transient-error retry.
// - One failed entity never aborts the others. It is logged, counted, and
//   keeps its previous ranking fields.
// - If the whole first chunk is refused by the store (`Unavailable`) it is
//   considered down and the run fails instead of grinding through every item.

use futures::future::join_all;
use resilience::{with_retry_if, with_timeout_result, RetryConfig, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::db::RankingStore;
use crate::error::{PopularityError, Result};
use crate::models::{EntityClass, RankUpdate, RankedPreview};

#[derive(Debug, Clone)]
pub struct BatchPersisterConfig {
    /// Entities written concurrently per chunk
    pub batch_size: usize,
    /// Pause between chunks
    pub batch_delay: Duration,
    /// Length of the preview returned with the report
    pub top_k: usize,
    pub write_retry: RetryConfig,
    pub write_timeout: Duration,
}

impl Default for BatchPersisterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_delay: Duration::from_millis(100),
            top_k: 10,
            write_retry: RetryConfig {
                max_retries: 2,
                ..Default::default()
            },
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistReport {
    pub updated: usize,
    pub errors: usize,
    pub failed_ids: Vec<i64>,
    pub top: Vec<RankedPreview>,
}

pub struct BatchPersister {
    store: Arc<dyn RankingStore>,
    config: BatchPersisterConfig,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn RankingStore>, config: BatchPersisterConfig) -> Self {
        Self { store, config }
    }

    /// Persist `updates`, which must already be in rank order. The preview in
    /// the report only lists entities whose write landed.
    pub async fn persist(&self, class: EntityClass, updates: &[RankUpdate]) -> Result<PersistReport> {
        let mut report = PersistReport::default();

        let batch_size = self.config.batch_size.max(1);
        let batch_count = updates.len().div_ceil(batch_size);

        for (batch_idx, batch) in updates.chunks(batch_size).enumerate() {
            debug!(
                class = %class,
                batch = batch_idx + 1,
                of = batch_count,
                entities = batch.len(),
                "Writing ranking batch"
            );

            let results = join_all(batch.iter().map(|update| self.write_one(class, update))).await;

            let mut batch_updated = 0;
            let mut first_error = None;
            let mut all_connectivity = true;

            for (update, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => batch_updated += 1,
                    Err(e) => {
                        error!(
                            class = %class,
                            entity_id = update.id,
                            error = %e,
                            "Failed to persist ranking"
                        );
                        // A timeout is per-item; only a refused connection counts as store down
                        all_connectivity &= matches!(e, PopularityError::Unavailable(_));
                        report.failed_ids.push(update.id);
                        first_error.get_or_insert(e);
                    }
                }
            }

            report.updated += batch_updated;
            report.errors = report.failed_ids.len();

            if batch_idx == 0 && batch_updated == 0 && all_connectivity {
                if let Some(e) = first_error {
                    return Err(PopularityError::Unavailable(format!(
                        "ranking store rejected every write of the first batch: {}",
                        e
                    )));
                }
            }

            if batch_idx + 1 < batch_count && !self.config.batch_delay.is_zero() {
                sleep(self.config.batch_delay).await;
            }
        }

        report.top = updates
            .iter()
            .filter(|update| !report.failed_ids.contains(&update.id))
            .take(self.config.top_k)
            .map(RankedPreview::from)
            .collect();

        info!(
            class = %class,
            updated = report.updated,
            errors = report.errors,
            "Ranking persistence finished"
        );

        Ok(report)
    }

    async fn write_one(&self, class: EntityClass, update: &RankUpdate) -> Result<()> {
        let store = &self.store;
        let timeout = self.config.write_timeout;

        with_retry_if(&self.config.write_retry, PopularityError::is_transient, || async move {
            with_timeout_result(timeout, store.write_ranking(class, update))
                .await
                .map_err(|e| match e {
                    TimeoutError::Elapsed(_) => PopularityError::Timeout,
                    TimeoutError::Inner(inner) => inner,
                })
        })
        .await
        .map_err(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{CatalogSignals, Signals};
    use crate::services::variation::Variation;

    fn fast_config(batch_size: usize) -> BatchPersisterConfig {
        BatchPersisterConfig {
            batch_size,
            batch_delay: Duration::ZERO,
            top_k: 3,
            write_retry: RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
            write_timeout: Duration::from_secs(1),
        }
    }

    fn update(id: i64, rank: u32) -> RankUpdate {
        RankUpdate {
            id,
            score: 100.0 - rank as f64,
            rank,
            variation: Variation::New,
            history: None,
        }
    }

    async fn seeded(count: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=count {
            store
                .upsert_signals(
                    EntityClass::Anime,
                    id,
                    Signals::Catalog(CatalogSignals::default()),
                )
                .await;
        }
        store
    }

    #[tokio::test]
    async fn test_persists_every_update_across_batches() {
        let store = seeded(7).await;
        let persister = BatchPersister::new(store.clone(), fast_config(3));
        let updates: Vec<RankUpdate> = (1..=7).map(|id| update(id, id as u32)).collect();

        let report = persister.persist(EntityClass::Anime, &updates).await.unwrap();

        assert_eq!(report.updated, 7);
        assert_eq!(report.errors, 0);
        assert_eq!(report.top.len(), 3);
        assert_eq!(report.top[0].rank, 1);
        assert_eq!(report.top[0].variation, "NEW");
        assert_eq!(store.entity(EntityClass::Anime, 7).await.unwrap().rank, 7);
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let store = seeded(4).await;
        store.fail_writes_for(EntityClass::Anime, 2).await;
        let persister = BatchPersister::new(store.clone(), fast_config(2));
        let updates: Vec<RankUpdate> = (1..=4).map(|id| update(id, id as u32)).collect();

        let report = persister.persist(EntityClass::Anime, &updates).await.unwrap();

        assert_eq!(report.updated, 3);
        assert_eq!(report.errors, 1);
        assert_eq!(report.failed_ids, vec![2]);
        assert_eq!(store.entity(EntityClass::Anime, 2).await.unwrap().rank, 0);

        let preview: Vec<i64> = report.top.iter().map(|p| p.id).collect();
        assert_eq!(preview, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_timed_out_first_batch_is_counted_per_item() {
        let store = seeded(3).await;
        store
            .stall_writes_for(EntityClass::Anime, 1, Duration::from_millis(500))
            .await;
        let persister = BatchPersister::new(
            store.clone(),
            BatchPersisterConfig {
                write_timeout: Duration::from_millis(50),
                ..fast_config(1)
            },
        );
        let updates: Vec<RankUpdate> = (1..=3).map(|id| update(id, id as u32)).collect();

        let report = persister.persist(EntityClass::Anime, &updates).await.unwrap();

        assert_eq!(report.updated, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.failed_ids, vec![1]);
        assert_eq!(report.top[0].id, 2);
        assert_eq!(store.entity(EntityClass::Anime, 1).await.unwrap().rank, 0);
        assert_eq!(store.entity(EntityClass::Anime, 3).await.unwrap().rank, 3);
    }

    #[tokio::test]
    async fn test_missing_entity_counts_as_error() {
        let store = seeded(1).await;
        let persister = BatchPersister::new(store, fast_config(10));

        let report = persister
            .persist(EntityClass::Anime, &[update(1, 1), update(99, 2)])
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.failed_ids, vec![99]);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_the_run() {
        let store = seeded(3).await;
        store.set_unavailable(true).await;
        let persister = BatchPersister::new(store, fast_config(2));
        let updates: Vec<RankUpdate> = (1..=3).map(|id| update(id, id as u32)).collect();

        let err = persister
            .persist(EntityClass::Anime, &updates)
            .await
            .unwrap_err();
        assert!(matches!(err, PopularityError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = seeded(0).await;
        let persister = BatchPersister::new(store, fast_config(10));

        let report = persister.persist(EntityClass::Anime, &[]).await.unwrap();
        assert_eq!(report, PersistReport::default());
    }
}
