use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PopularityError;
use crate::services::history::RankHistory;
use crate::services::variation::Variation;

/// Catalog entity classes that get ranked independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Anime,
    Manga,
    Review,
}

impl EntityClass {
    pub const ALL: [EntityClass; 3] = [EntityClass::Anime, EntityClass::Manga, EntityClass::Review];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anime => "anime",
            Self::Manga => "manga",
            Self::Review => "review",
        }
    }

    /// Reviews keep a day-keyed rank trail; catalog entities keep a variation marker.
    pub fn keeps_history(&self) -> bool {
        matches!(self, Self::Review)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityClass {
    type Err = PopularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anime" => Ok(Self::Anime),
            "manga" => Ok(Self::Manga),
            "review" | "reviews" => Ok(Self::Review),
            other => Err(PopularityError::InvalidInput(format!(
                "unknown entity class '{}'",
                other
            ))),
        }
    }
}

/// Aggregated signals for anime and manga
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSignals {
    /// Distinct users holding the item in a personal collection
    pub users_in_collection: i64,
    pub avg_review_score: f64,
    /// Raw view counter
    pub views: i64,
    pub avg_collection_rating: f64,
    /// Number of collection ratings; breaks score ties
    pub rating_count: i64,
}

/// Aggregated signals for user reviews
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewSignals {
    pub total_views: i64,
    /// Views inside the recent window
    pub recent_views: i64,
    /// Last-day view rate over last-week daily view rate
    pub growth_ratio: f64,
    pub avg_rating: f64,
    pub rating_count: i64,
    /// Distinct positive reaction categories
    pub positive_reactions: i64,
    pub negative_reactions: i64,
    pub text_length: i64,
    pub age_days: i64,
}

impl ReviewSignals {
    /// Short-term growth: views in the last day against the daily average of the last week.
    /// Zero when there is no weekly baseline.
    pub fn growth_ratio_from(last_day_views: i64, last_week_views: i64) -> f64 {
        if last_week_views <= 0 {
            return 0.0;
        }
        let weekly_daily_rate = last_week_views as f64 / 7.0;
        last_day_views.max(0) as f64 / weekly_daily_rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signals {
    Catalog(CatalogSignals),
    Review(ReviewSignals),
}

impl Signals {
    /// Secondary sort key for equal scores (higher wins).
    pub fn tie_break(&self) -> i64 {
        match self {
            Signals::Catalog(s) => s.rating_count.max(0),
            Signals::Review(_) => 0,
        }
    }

    pub fn rating_count(&self) -> i64 {
        match self {
            Signals::Catalog(s) => s.rating_count,
            Signals::Review(s) => s.rating_count,
        }
    }
}

/// Ranking state persisted by the previous run, read at the start of this one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorState {
    /// 0 when the entity was not ranked
    pub rank: u32,
    /// Raw stored variation marker (catalog) or history blob (reviews)
    pub marker: Option<String>,
}

/// One eligible entity as returned by a signal reader
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub id: i64,
    pub signals: Signals,
    pub prior: PriorState,
}

/// Which entities take part in a run. Published/active status is always required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EligibilityFilter {
    pub min_ratings: i64,
}

impl EligibilityFilter {
    pub fn admits(&self, signals: &Signals) -> bool {
        signals.rating_count() >= self.min_ratings
    }
}

/// New ranking fields for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct RankUpdate {
    pub id: i64,
    pub score: f64,
    pub rank: u32,
    /// Change against the rank stored by the previous run
    pub variation: Variation,
    /// Compacted trail; only set for classes that keep history
    pub history: Option<RankHistory>,
}

/// Ranking as currently stored, used for stats and previews
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRanking {
    pub id: i64,
    pub rank: u32,
    pub score: f64,
    pub marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPreview {
    pub rank: u32,
    pub id: i64,
    pub score: f64,
    pub variation: String,
}

impl From<&RankUpdate> for RankedPreview {
    fn from(update: &RankUpdate) -> Self {
        Self {
            rank: update.rank,
            id: update.id,
            score: update.score,
            variation: update.variation.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Result of one completed recompute
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub class: EntityClass,
    pub stats: RunStats,
    pub top: Vec<RankedPreview>,
    pub cleared: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// What a recompute entrypoint hands back to its caller.
///
/// `stats` is `None` only when the run failed fatally; an empty source set is a
/// successful run with `total == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeOutcome {
    pub success: bool,
    pub class: EntityClass,
    pub message: String,
    pub stats: Option<RunStats>,
    pub top10: Vec<RankedPreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecomputeOutcome {
    pub fn completed(report: &RunReport) -> Self {
        let message = if report.stats.total == 0 {
            format!("No eligible {} entries; nothing to rank", report.class)
        } else if report.stats.errors > 0 {
            format!(
                "Ranked {} {} entries with {} write errors",
                report.stats.total, report.class, report.stats.errors
            )
        } else {
            format!("Ranked {} {} entries", report.stats.total, report.class)
        };

        Self {
            success: true,
            class: report.class,
            message,
            stats: Some(report.stats),
            top10: report.top.clone(),
            completed_at: Some(report.completed_at),
        }
    }

    pub fn failed(class: EntityClass, error: &PopularityError) -> Self {
        Self {
            success: false,
            class,
            message: format!("{} recompute failed: {}", class, error),
            stats: None,
            top10: Vec::new(),
            completed_at: None,
        }
    }
}

/// Review coverage figures as aggregated by storage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewCoverage {
    pub total_reviews: i64,
    pub reviews_with_score: i64,
    pub average_score: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_reviews: i64,
    pub reviews_with_score: i64,
    pub coverage_percent: f64,
    pub average_score: f64,
    pub top10: Vec<RankedPreview>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl JobStats {
    pub fn from_coverage(coverage: ReviewCoverage, top10: Vec<RankedPreview>) -> Self {
        let coverage_percent = if coverage.total_reviews > 0 {
            let pct = coverage.reviews_with_score as f64 / coverage.total_reviews as f64 * 100.0;
            (pct * 100.0).round() / 100.0
        } else {
            0.0
        };

        Self {
            total_reviews: coverage.total_reviews,
            reviews_with_score: coverage.reviews_with_score,
            coverage_percent,
            average_score: coverage.average_score.unwrap_or(0.0),
            top10,
            last_updated: coverage.last_updated,
        }
    }
}
