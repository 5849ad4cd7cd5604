//! PostgreSQL signal aggregation and ranking writes.
//!
//! Catalog signals come from `collection_entries` and published `reviews`;
//! review signals from `review_views`, `review_ratings` and `review_reactions`.
//! Reads page by id (keyset) so large catalogs are never truncated by a LIMIT.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;

use super::{RankingStore, SignalReader};
use crate::error::{PopularityError, Result};
use crate::models::{
    CatalogSignals, EligibilityFilter, EntityClass, PriorState, RankUpdate, ReviewCoverage,
    ReviewSignals, SignalRow, Signals, StoredRanking,
};

/// Reaction stored for a thumbs-down; every other reaction kind counts as positive
const NEGATIVE_REACTION: &str = "dislike";

#[derive(Debug, sqlx::FromRow)]
struct CatalogSignalRow {
    id: i64,
    users_in_collection: i64,
    avg_review_score: f64,
    views: i64,
    avg_collection_rating: f64,
    rating_count: i64,
    popularity_rank: i32,
    rank_variation: Option<String>,
}

impl From<CatalogSignalRow> for SignalRow {
    fn from(row: CatalogSignalRow) -> Self {
        SignalRow {
            id: row.id,
            signals: Signals::Catalog(CatalogSignals {
                users_in_collection: row.users_in_collection,
                avg_review_score: row.avg_review_score,
                views: row.views,
                avg_collection_rating: row.avg_collection_rating,
                rating_count: row.rating_count,
            }),
            prior: PriorState {
                rank: stored_rank(row.popularity_rank),
                marker: row.rank_variation,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReviewSignalRow {
    id: i64,
    total_views: i64,
    recent_views: i64,
    last_day_views: i64,
    last_week_views: i64,
    avg_rating: f64,
    rating_count: i64,
    positive_reactions: i64,
    negative_reactions: i64,
    text_length: i64,
    age_days: i64,
    popularity_rank: i32,
    rank_history: Option<String>,
}

impl From<ReviewSignalRow> for SignalRow {
    fn from(row: ReviewSignalRow) -> Self {
        SignalRow {
            id: row.id,
            signals: Signals::Review(ReviewSignals {
                total_views: row.total_views,
                recent_views: row.recent_views,
                growth_ratio: ReviewSignals::growth_ratio_from(
                    row.last_day_views,
                    row.last_week_views,
                ),
                avg_rating: row.avg_rating,
                rating_count: row.rating_count,
                positive_reactions: row.positive_reactions,
                negative_reactions: row.negative_reactions,
                text_length: row.text_length,
                age_days: row.age_days,
            }),
            prior: PriorState {
                rank: stored_rank(row.popularity_rank),
                marker: row.rank_history,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoredRankingRow {
    id: i64,
    popularity_rank: i32,
    popularity_score: f64,
    marker: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct CoverageRow {
    total_reviews: i64,
    reviews_with_score: i64,
    average_score: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
}

fn stored_rank(rank: i32) -> u32 {
    u32::try_from(rank).unwrap_or(0)
}

fn table(class: EntityClass) -> &'static str {
    match class {
        EntityClass::Anime => "anime",
        EntityClass::Manga => "manga",
        EntityClass::Review => "reviews",
    }
}

fn marker_column(class: EntityClass) -> &'static str {
    if class.keeps_history() {
        "rank_history"
    } else {
        "rank_variation"
    }
}

/// Postgres-backed [`SignalReader`] and [`RankingStore`]
#[derive(Clone)]
pub struct PgPopularityStore {
    pool: PgPool,
    recent_window_days: i32,
}

impl PgPopularityStore {
    pub fn new(pool: PgPool, recent_window_days: i32) -> Self {
        Self {
            pool,
            recent_window_days: recent_window_days.max(1),
        }
    }

    async fn read_catalog_page(
        &self,
        class: EntityClass,
        filter: &EligibilityFilter,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<SignalRow>> {
        let entity_type = class.as_str();
        let sql = format!(
            r#"
            SELECT e.id,
                   COALESCE(c.users_in_collection, 0)::INT8 AS users_in_collection,
                   COALESCE(r.avg_review_score, 0)::FLOAT8 AS avg_review_score,
                   COALESCE(e.views, 0)::INT8 AS views,
                   COALESCE(c.avg_collection_rating, 0)::FLOAT8 AS avg_collection_rating,
                   COALESCE(c.rating_count, 0)::INT8 AS rating_count,
                   e.popularity_rank,
                   e.rank_variation
            FROM {table} e
            LEFT JOIN LATERAL (
                SELECT COUNT(DISTINCT ce.user_id) AS users_in_collection,
                       AVG(ce.rating) AS avg_collection_rating,
                       COUNT(ce.rating) AS rating_count
                FROM collection_entries ce
                WHERE ce.entity_type = $4 AND ce.entity_id = e.id
            ) c ON TRUE
            LEFT JOIN LATERAL (
                SELECT AVG(rv.score) AS avg_review_score
                FROM reviews rv
                WHERE rv.entity_type = $4 AND rv.entity_id = e.id AND rv.status = 'published'
            ) r ON TRUE
            WHERE e.status = 'published'
              AND e.id > $1
              AND COALESCE(c.rating_count, 0) >= $2
            ORDER BY e.id
            LIMIT $3
            "#,
            table = table(class)
        );

        let rows = sqlx::query_as::<_, CatalogSignalRow>(&sql)
            .bind(after_id)
            .bind(filter.min_ratings)
            .bind(limit)
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(class = %class, error = %e, "Failed to read catalog signals");
                PopularityError::from(e)
            })?;

        Ok(rows.into_iter().map(SignalRow::from).collect())
    }

    async fn read_review_page(
        &self,
        filter: &EligibilityFilter,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<SignalRow>> {
        let rows = sqlx::query_as::<_, ReviewSignalRow>(
            r#"
            SELECT rv.id,
                   COALESCE(rv.view_count, 0)::INT8 AS total_views,
                   COALESCE(v.recent_views, 0)::INT8 AS recent_views,
                   COALESCE(v.last_day_views, 0)::INT8 AS last_day_views,
                   COALESCE(v.last_week_views, 0)::INT8 AS last_week_views,
                   COALESCE(rt.avg_rating, 0)::FLOAT8 AS avg_rating,
                   COALESCE(rt.rating_count, 0)::INT8 AS rating_count,
                   COALESCE(re.positive_reactions, 0)::INT8 AS positive_reactions,
                   COALESCE(re.negative_reactions, 0)::INT8 AS negative_reactions,
                   COALESCE(char_length(rv.content), 0)::INT8 AS text_length,
                   GREATEST(EXTRACT(DAY FROM NOW() - rv.created_at), 0)::INT8 AS age_days,
                   rv.popularity_rank,
                   rv.rank_history
            FROM reviews rv
            LEFT JOIN LATERAL (
                SELECT COUNT(*) FILTER (WHERE viewed_at >= NOW() - make_interval(days => $4)) AS recent_views,
                       COUNT(*) FILTER (WHERE viewed_at >= NOW() - INTERVAL '1 day') AS last_day_views,
                       COUNT(*) FILTER (WHERE viewed_at >= NOW() - INTERVAL '7 days') AS last_week_views
                FROM review_views
                WHERE review_id = rv.id
            ) v ON TRUE
            LEFT JOIN LATERAL (
                SELECT AVG(rating) AS avg_rating, COUNT(*) AS rating_count
                FROM review_ratings
                WHERE review_id = rv.id
            ) rt ON TRUE
            LEFT JOIN LATERAL (
                SELECT COUNT(DISTINCT reaction) FILTER (WHERE reaction <> $5) AS positive_reactions,
                       COUNT(*) FILTER (WHERE reaction = $5) AS negative_reactions
                FROM review_reactions
                WHERE review_id = rv.id
            ) re ON TRUE
            WHERE rv.status = 'published'
              AND rv.id > $1
              AND COALESCE(rt.rating_count, 0) >= $2
            ORDER BY rv.id
            LIMIT $3
            "#,
        )
        .bind(after_id)
        .bind(filter.min_ratings)
        .bind(limit)
        .bind(self.recent_window_days)
        .bind(NEGATIVE_REACTION)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to read review signals");
            PopularityError::from(e)
        })?;

        Ok(rows.into_iter().map(SignalRow::from).collect())
    }
}

#[async_trait]
impl SignalReader for PgPopularityStore {
    async fn read_signal_page(
        &self,
        class: EntityClass,
        filter: &EligibilityFilter,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SignalRow>> {
        let after_id = after_id.unwrap_or(i64::MIN);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        match class {
            EntityClass::Anime | EntityClass::Manga => {
                self.read_catalog_page(class, filter, after_id, limit).await
            }
            EntityClass::Review => self.read_review_page(filter, after_id, limit).await,
        }
    }
}

#[async_trait]
impl RankingStore for PgPopularityStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn write_ranking(&self, class: EntityClass, update: &RankUpdate) -> Result<()> {
        let marker = match &update.history {
            Some(history) if class.keeps_history() => history.to_stored()?,
            _ => update.variation.to_string(),
        };
        let rank = i32::try_from(update.rank).map_err(|_| {
            PopularityError::InvalidInput(format!("rank {} out of range", update.rank))
        })?;

        let sql = format!(
            "UPDATE {table}
             SET popularity_score = $1,
                 popularity_rank = $2,
                 {column} = $3,
                 popularity_updated_at = NOW()
             WHERE id = $4",
            table = table(class),
            column = marker_column(class)
        );

        let result = sqlx::query(&sql)
            .bind(update.score)
            .bind(rank)
            .bind(marker)
            .bind(update.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PopularityError::EntityMissing {
                class,
                id: update.id,
            });
        }

        Ok(())
    }

    async fn clear_stale_ranks(&self, class: EntityClass, ranked_ids: &[i64]) -> Result<u64> {
        // Reviews keep their trail for trend display; catalog markers are dropped
        let reset_marker = if class.keeps_history() {
            ""
        } else {
            ", rank_variation = NULL"
        };
        let sql = format!(
            "UPDATE {table}
             SET popularity_rank = 0{reset_marker},
                 popularity_updated_at = NOW()
             WHERE popularity_rank <> 0 AND NOT (id = ANY($1))",
            table = table(class),
            reset_marker = reset_marker
        );

        let result = sqlx::query(&sql)
            .bind(ranked_ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn top_ranked(&self, class: EntityClass, limit: usize) -> Result<Vec<StoredRanking>> {
        let sql = format!(
            "SELECT id, popularity_rank, popularity_score, {column} AS marker
             FROM {table}
             WHERE popularity_rank > 0
             ORDER BY popularity_rank
             LIMIT $1",
            table = table(class),
            column = marker_column(class)
        );

        let rows = sqlx::query_as::<_, StoredRankingRow>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredRanking {
                id: row.id,
                rank: stored_rank(row.popularity_rank),
                score: row.popularity_score,
                marker: row.marker,
            })
            .collect())
    }

    async fn review_coverage(&self) -> Result<ReviewCoverage> {
        let row = sqlx::query_as::<_, CoverageRow>(
            r#"
            SELECT COUNT(*)::INT8 AS total_reviews,
                   COUNT(*) FILTER (WHERE popularity_score > 0)::INT8 AS reviews_with_score,
                   AVG(popularity_score) FILTER (WHERE popularity_score > 0)::FLOAT8 AS average_score,
                   MAX(popularity_updated_at) AS last_updated
            FROM reviews
            WHERE status = 'published'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ReviewCoverage {
            total_reviews: row.total_reviews,
            reviews_with_score: row.reviews_with_score,
            average_score: row.average_score,
            last_updated: row.last_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_row_derives_growth_ratio() {
        let row = ReviewSignalRow {
            id: 7,
            total_views: 900,
            recent_views: 70,
            last_day_views: 30,
            last_week_views: 70,
            avg_rating: 8.0,
            rating_count: 4,
            positive_reactions: 2,
            negative_reactions: 1,
            text_length: 1200,
            age_days: 12,
            popularity_rank: 3,
            rank_history: Some("+1".to_string()),
        };

        let signal_row = SignalRow::from(row);
        match signal_row.signals {
            Signals::Review(s) => assert!((s.growth_ratio - 3.0).abs() < 1e-9),
            other => panic!("unexpected signals: {:?}", other),
        }
        assert_eq!(signal_row.prior.rank, 3);
    }

    #[test]
    fn test_negative_stored_rank_reads_as_unranked() {
        assert_eq!(stored_rank(-1), 0);
        assert_eq!(stored_rank(12), 12);
    }

    #[test]
    fn test_marker_columns() {
        assert_eq!(marker_column(EntityClass::Review), "rank_history");
        assert_eq!(marker_column(EntityClass::Anime), "rank_variation");
        assert_eq!(table(EntityClass::Review), "reviews");
    }
}
