//! Redis cache for run outcomes and review job stats.
//!
//! Best effort: the engine never depends on it, and a Redis failure is logged
//! and ignored.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{EntityClass, JobStats, RecomputeOutcome};

const JOB_STATS_KEY: &str = "popularity:job_stats";

fn last_run_key(class: EntityClass) -> String {
    format!("popularity:last_run:{}", class)
}

#[derive(Clone)]
pub struct PopularityCache {
    redis: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl PopularityCache {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            redis: Some(redis),
            ttl_secs,
        }
    }

    /// Cache that stores nothing and always misses
    pub fn disabled() -> Self {
        Self {
            redis: None,
            ttl_secs: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn store_last_outcome(&self, outcome: &RecomputeOutcome) {
        let key = last_run_key(outcome.class);
        if let Err(e) = self.set_json(&key, outcome).await {
            warn!(class = %outcome.class, "Failed to cache recompute outcome: {}", e);
        }
    }

    pub async fn last_outcome(&self, class: EntityClass) -> Option<RecomputeOutcome> {
        self.get_json(&last_run_key(class)).await
    }

    pub async fn job_stats(&self) -> Option<JobStats> {
        self.get_json(JOB_STATS_KEY).await
    }

    pub async fn store_job_stats(&self, stats: &JobStats) {
        if let Err(e) = self.set_json(JOB_STATS_KEY, stats).await {
            warn!("Failed to cache job stats: {}", e);
        }
    }

    /// Drop cached stats after a review run changed them
    pub async fn invalidate_job_stats(&self) {
        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.clone();
        let result: redis::RedisResult<()> = conn.del(JOB_STATS_KEY).await;
        if let Err(e) = result {
            warn!("Failed to invalidate job stats cache: {}", e);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.clone();

        let cached: Option<String> = match conn.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Redis GET {} failed: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&cached?) {
            Ok(value) => {
                debug!("Popularity cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };
        let mut conn = redis.clone();
        let json = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, json, self.ttl_secs.max(1)).await?;
        Ok(())
    }
}
