//! In-process store used by tests and local dry runs.
//!
//! Implements both storage seams over a map per entity class. Failure switches:
//! `set_fail_reads` breaks the signal read, `set_unavailable` breaks every
//! ranking write, `fail_writes_for` breaks the writes of one entity and
//! `stall_writes_for` delays them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{RankingStore, SignalReader};
use crate::error::{PopularityError, Result};
use crate::models::{
    EligibilityFilter, EntityClass, PriorState, RankUpdate, ReviewCoverage, SignalRow, Signals,
    StoredRanking,
};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    pub signals: Signals,
    pub published: bool,
    pub score: f64,
    pub rank: u32,
    pub marker: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemoryEntity {
    fn new(signals: Signals) -> Self {
        Self {
            signals,
            published: true,
            score: 0.0,
            rank: 0,
            marker: None,
            updated_at: None,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    entities: HashMap<EntityClass, BTreeMap<i64, MemoryEntity>>,
    failing_writes: HashSet<(EntityClass, i64)>,
    stalled_writes: HashMap<(EntityClass, i64), Duration>,
    unavailable: bool,
    fail_reads: bool,
}

impl MemoryState {
    fn class_mut(&mut self, class: EntityClass) -> &mut BTreeMap<i64, MemoryEntity> {
        self.entities.entry(class).or_default()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity or replace its signals, keeping its ranking fields.
    pub async fn upsert_signals(&self, class: EntityClass, id: i64, signals: Signals) {
        let mut state = self.state.write().await;
        state
            .class_mut(class)
            .entry(id)
            .and_modify(|e| e.signals = signals.clone())
            .or_insert_with(|| MemoryEntity::new(signals));
    }

    pub async fn set_published(&self, class: EntityClass, id: i64, published: bool) {
        let mut state = self.state.write().await;
        if let Some(entity) = state.class_mut(class).get_mut(&id) {
            entity.published = published;
        }
    }

    /// Seed ranking state as a previous run (or an older schema) would have left it.
    pub async fn set_prior(&self, class: EntityClass, id: i64, rank: u32, marker: Option<&str>) {
        let mut state = self.state.write().await;
        if let Some(entity) = state.class_mut(class).get_mut(&id) {
            entity.rank = rank;
            entity.marker = marker.map(str::to_string);
        }
    }

    pub async fn fail_writes_for(&self, class: EntityClass, id: i64) {
        self.state.write().await.failing_writes.insert((class, id));
    }

    pub async fn stall_writes_for(&self, class: EntityClass, id: i64, delay: Duration) {
        self.state
            .write()
            .await
            .stalled_writes
            .insert((class, id), delay);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn set_fail_reads(&self, fail_reads: bool) {
        self.state.write().await.fail_reads = fail_reads;
    }

    pub async fn entity(&self, class: EntityClass, id: i64) -> Option<MemoryEntity> {
        self.state
            .read()
            .await
            .entities
            .get(&class)
            .and_then(|entities| entities.get(&id))
            .cloned()
    }

    /// `(id, rank)` for every entity of the class, ordered by id.
    pub async fn ranks(&self, class: EntityClass) -> Vec<(i64, u32)> {
        self.state
            .read()
            .await
            .entities
            .get(&class)
            .map(|entities| entities.iter().map(|(id, e)| (*id, e.rank)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SignalReader for MemoryStore {
    async fn read_signal_page(
        &self,
        class: EntityClass,
        filter: &EligibilityFilter,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SignalRow>> {
        let state = self.state.read().await;
        if state.fail_reads {
            return Err(PopularityError::Unavailable(
                "signal source unreachable".to_string(),
            ));
        }

        let Some(entities) = state.entities.get(&class) else {
            return Ok(Vec::new());
        };

        Ok(entities
            .iter()
            .filter(|(id, _)| after_id.map_or(true, |after| **id > after))
            .filter(|(_, e)| e.published && filter.admits(&e.signals))
            .take(limit)
            .map(|(id, e)| SignalRow {
                id: *id,
                signals: e.signals.clone(),
                prior: PriorState {
                    rank: e.rank,
                    marker: e.marker.clone(),
                },
            })
            .collect())
    }
}

#[async_trait]
impl RankingStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.state.read().await.unavailable {
            return Err(PopularityError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn write_ranking(&self, class: EntityClass, update: &RankUpdate) -> Result<()> {
        let marker = match &update.history {
            Some(history) if class.keeps_history() => history.to_stored()?,
            _ => update.variation.to_string(),
        };

        let stall = self
            .state
            .read()
            .await
            .stalled_writes
            .get(&(class, update.id))
            .copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(PopularityError::Unavailable("connection refused".to_string()));
        }
        if state.failing_writes.contains(&(class, update.id)) {
            return Err(PopularityError::Database(format!(
                "simulated write failure for {} {}",
                class, update.id
            )));
        }

        let entity = state
            .class_mut(class)
            .get_mut(&update.id)
            .ok_or(PopularityError::EntityMissing {
                class,
                id: update.id,
            })?;

        entity.score = update.score;
        entity.rank = update.rank;
        entity.marker = Some(marker);
        entity.updated_at = Some(Utc::now());

        Ok(())
    }

    async fn clear_stale_ranks(&self, class: EntityClass, ranked_ids: &[i64]) -> Result<u64> {
        let ranked: HashSet<i64> = ranked_ids.iter().copied().collect();
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(PopularityError::Unavailable("connection refused".to_string()));
        }

        let mut cleared = 0;
        for (id, entity) in state.class_mut(class).iter_mut() {
            if entity.rank != 0 && !ranked.contains(id) {
                entity.rank = 0;
                if !class.keeps_history() {
                    entity.marker = None;
                }
                entity.updated_at = Some(Utc::now());
                cleared += 1;
            }
        }

        Ok(cleared)
    }

    async fn top_ranked(&self, class: EntityClass, limit: usize) -> Result<Vec<StoredRanking>> {
        let state = self.state.read().await;
        let mut ranked: Vec<StoredRanking> = state
            .entities
            .get(&class)
            .map(|entities| {
                entities
                    .iter()
                    .filter(|(_, e)| e.rank > 0)
                    .map(|(id, e)| StoredRanking {
                        id: *id,
                        rank: e.rank,
                        score: e.score,
                        marker: e.marker.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ranked.sort_by_key(|r| r.rank);
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn review_coverage(&self) -> Result<ReviewCoverage> {
        let state = self.state.read().await;
        let Some(reviews) = state.entities.get(&EntityClass::Review) else {
            return Ok(ReviewCoverage::default());
        };

        let published: Vec<&MemoryEntity> = reviews.values().filter(|e| e.published).collect();
        let scored: Vec<f64> = published
            .iter()
            .map(|e| e.score)
            .filter(|s| *s > 0.0)
            .collect();

        Ok(ReviewCoverage {
            total_reviews: published.len() as i64,
            reviews_with_score: scored.len() as i64,
            average_score: if scored.is_empty() {
                None
            } else {
                Some(scored.iter().sum::<f64>() / scored.len() as f64)
            },
            last_updated: published.iter().filter_map(|e| e.updated_at).max(),
        })
    }
}
