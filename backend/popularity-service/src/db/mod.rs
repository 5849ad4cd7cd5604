//! Storage seams of the ranking engine.
//!
//! [`SignalReader`] supplies eligible entities with their raw signals and the
//! ranking state left by the previous run. [`RankingStore`] owns the three
//! ranking fields (score, rank, variation/history) of every entity.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::models::{
    EligibilityFilter, EntityClass, RankUpdate, ReviewCoverage, SignalRow, StoredRanking,
};

pub use memory::MemoryStore;
pub use postgres::PgPopularityStore;

#[async_trait]
pub trait SignalReader: Send + Sync {
    /// One page of eligible entities with `id > after_id`, ordered by id.
    async fn read_signal_page(
        &self,
        class: EntityClass,
        filter: &EligibilityFilter,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SignalRow>>;

    /// Every eligible entity, paging by id until a short page comes back.
    async fn read_all_signals(
        &self,
        class: EntityClass,
        filter: &EligibilityFilter,
        page_size: usize,
    ) -> Result<Vec<SignalRow>> {
        let page_size = page_size.max(1);
        let mut rows = Vec::new();
        let mut after_id = None;

        loop {
            let page = self
                .read_signal_page(class, filter, after_id, page_size)
                .await?;
            let fetched = page.len();

            debug!(
                class = %class,
                after_id = ?after_id,
                fetched = fetched,
                "Fetched signal page"
            );

            after_id = page.last().map(|row| row.id);
            rows.extend(page);

            if fetched < page_size {
                break;
            }
        }

        Ok(rows)
    }
}

#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Cheap round trip used before persisting to detect a dead connection.
    async fn ping(&self) -> Result<()>;

    /// Write score, rank and variation/history of one entity atomically.
    async fn write_ranking(&self, class: EntityClass, update: &RankUpdate) -> Result<()>;

    /// Reset entities ranked by an earlier run but absent from `ranked_ids`.
    async fn clear_stale_ranks(&self, class: EntityClass, ranked_ids: &[i64]) -> Result<u64>;

    /// Currently stored rankings, best first.
    async fn top_ranked(&self, class: EntityClass, limit: usize) -> Result<Vec<StoredRanking>>;

    async fn review_coverage(&self) -> Result<ReviewCoverage>;
}

/// Connections owned by the service binary
#[derive(Clone)]
pub struct Database {
    pub pg: PgPool,
    pub redis: redis::Client,
}

impl Database {
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pg = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;

        info!("PostgreSQL connection pool established");

        let redis = redis::Client::open(config.redis.url.as_str())?;

        info!("Redis client created");

        Ok(Self { pg, redis })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pg).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn redis_manager(&self) -> anyhow::Result<redis::aio::ConnectionManager> {
        Ok(redis::aio::ConnectionManager::new(self.redis.clone()).await?)
    }
}
