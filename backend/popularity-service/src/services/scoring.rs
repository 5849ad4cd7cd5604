// ============================================
// Popularity Scorer
// ============================================
//
// Turns one entity's aggregated signals into a single scalar score.
//
// Catalog (anime/manga):
//   usersInCollection*10 + avgReviewScore*5 + views/100 + avgCollectionRating*2
//
// Reviews:
//   positive = Σ weight * log1p(count) + growth + rating terms
//   score    = positive * age_decay - negative_weight * log1p(negative_reactions)
//
// Counts are log-damped and ratios clamped so that 10^7-scale inputs stay in a
// small range. The age decay only scales the positive part, which keeps the
// score non-increasing in age even when negative reactions dominate.
//
// Negative, NaN or infinite inputs are read as zero.

use crate::models::{CatalogSignals, ReviewSignals, Signals};

/// Growth ratios above this are treated as equal
const MAX_GROWTH_RATIO: f64 = 10.0;
/// Ratings are on a 0-10 scale
const MAX_RATING: f64 = 10.0;

/// Weights for the review composite
#[derive(Debug, Clone)]
pub struct ReviewWeights {
    pub total_views: f64,
    pub recent_views: f64,
    pub growth: f64,
    pub avg_rating: f64,
    pub rating_count: f64,
    pub positive_reactions: f64,
    pub negative_reactions: f64,
    pub text_length: f64,
    /// Age at which the positive part is halved
    pub age_half_life_days: f64,
}

impl Default for ReviewWeights {
    fn default() -> Self {
        Self {
            total_views: 1.0,
            recent_views: 1.5,
            growth: 2.0,
            avg_rating: 3.0,
            rating_count: 2.0,
            positive_reactions: 2.5,
            negative_reactions: 3.0,
            text_length: 0.5,
            age_half_life_days: 30.0,
        }
    }
}

/// Scores signal vectors of any entity class
#[derive(Debug, Clone, Default)]
pub struct PopularityScorer {
    review_weights: ReviewWeights,
}

impl PopularityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_review_weights(review_weights: ReviewWeights) -> Self {
        Self { review_weights }
    }

    pub fn score(&self, signals: &Signals) -> f64 {
        match signals {
            Signals::Catalog(s) => catalog_score(s),
            Signals::Review(s) => review_score(s, &self.review_weights),
        }
    }
}

pub fn catalog_score(s: &CatalogSignals) -> f64 {
    count(s.users_in_collection) * 10.0
        + non_negative(s.avg_review_score) * 5.0
        + count(s.views) / 100.0
        + non_negative(s.avg_collection_rating) * 2.0
}

pub fn review_score(s: &ReviewSignals, w: &ReviewWeights) -> f64 {
    let positive = w.total_views * damped(s.total_views)
        + w.recent_views * damped(s.recent_views)
        + w.growth * non_negative(s.growth_ratio).min(MAX_GROWTH_RATIO)
        + w.avg_rating * non_negative(s.avg_rating).min(MAX_RATING)
        + w.rating_count * damped(s.rating_count)
        + w.positive_reactions * damped(s.positive_reactions)
        + w.text_length * damped(s.text_length);

    let negative = w.negative_reactions * damped(s.negative_reactions);

    positive * age_decay(s.age_days, w.age_half_life_days) - negative
}

/// 1.0 for brand-new content, 0.5 at the half-life, approaching 0 afterwards.
fn age_decay(age_days: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    1.0 / (1.0 + count(age_days) / half_life_days)
}

fn count(v: i64) -> f64 {
    v.max(0) as f64
}

fn damped(v: i64) -> f64 {
    count(v).ln_1p()
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(total_views: i64) -> ReviewSignals {
        ReviewSignals {
            total_views,
            ..Default::default()
        }
    }

    #[test]
    fn test_catalog_formula() {
        let s = CatalogSignals {
            users_in_collection: 12,
            avg_review_score: 8.0,
            views: 2500,
            avg_collection_rating: 7.5,
            rating_count: 40,
        };
        // 120 + 40 + 25 + 15
        assert!((catalog_score(&s) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_zero_and_malformed_signals_score_zero() {
        assert_eq!(catalog_score(&CatalogSignals::default()), 0.0);
        assert_eq!(
            review_score(&ReviewSignals::default(), &ReviewWeights::default()),
            0.0
        );

        let malformed = CatalogSignals {
            users_in_collection: -5,
            avg_review_score: f64::NAN,
            views: -100,
            avg_collection_rating: f64::INFINITY,
            rating_count: 0,
        };
        assert_eq!(catalog_score(&malformed), 0.0);
    }

    #[test]
    fn test_review_views_strictly_ordered() {
        let w = ReviewWeights::default();
        let a = review_score(&review(100), &w);
        let b = review_score(&review(50), &w);
        let c = review_score(&review(10), &w);
        assert!(a > b && b > c && c > 0.0);
    }

    #[test]
    fn test_review_monotonicity() {
        let w = ReviewWeights::default();
        let base = ReviewSignals {
            total_views: 500,
            recent_views: 40,
            growth_ratio: 1.2,
            avg_rating: 7.0,
            rating_count: 12,
            positive_reactions: 3,
            negative_reactions: 2,
            text_length: 1800,
            age_days: 20,
        };
        let score = review_score(&base, &w);

        let older = ReviewSignals { age_days: 200, ..base.clone() };
        assert!(review_score(&older, &w) < score);

        let disliked = ReviewSignals { negative_reactions: 50, ..base.clone() };
        assert!(review_score(&disliked, &w) < score);

        let liked = ReviewSignals { positive_reactions: 4, ..base.clone() };
        assert!(review_score(&liked, &w) > score);

        let growing = ReviewSignals { growth_ratio: 3.0, ..base.clone() };
        assert!(review_score(&growing, &w) > score);
    }

    #[test]
    fn test_age_never_raises_a_negative_score() {
        let w = ReviewWeights::default();
        let young = ReviewSignals {
            total_views: 3,
            negative_reactions: 1_000,
            age_days: 1,
            ..Default::default()
        };
        let old = ReviewSignals { age_days: 3_000, ..young.clone() };
        assert!(review_score(&young, &w) < 0.0);
        assert!(review_score(&old, &w) <= review_score(&young, &w));
    }

    #[test]
    fn test_review_score_bounded_for_large_inputs() {
        let w = ReviewWeights::default();
        let huge = ReviewSignals {
            total_views: 10_000_000,
            recent_views: 10_000_000,
            growth_ratio: 1e12,
            avg_rating: 1e9,
            rating_count: 10_000_000,
            positive_reactions: 10_000_000,
            negative_reactions: 0,
            text_length: 10_000_000,
            age_days: 0,
        };
        let score = review_score(&huge, &w);
        assert!(score.is_finite());
        assert!(score < 500.0);
    }

    #[test]
    fn test_custom_weights_apply_to_reviews_only() {
        let scorer = PopularityScorer::with_review_weights(ReviewWeights {
            total_views: 0.0,
            ..Default::default()
        });
        assert_eq!(scorer.score(&Signals::Review(review(1_000))), 0.0);

        let catalog = Signals::Catalog(CatalogSignals {
            views: 1_000,
            ..Default::default()
        });
        assert_eq!(scorer.score(&catalog), 10.0);
    }

    #[test]
    fn test_scorer_is_deterministic() {
        let scorer = PopularityScorer::new();
        let signals = Signals::Review(ReviewSignals {
            total_views: 77,
            recent_views: 9,
            growth_ratio: 0.4,
            age_days: 3,
            ..Default::default()
        });
        assert_eq!(scorer.score(&signals), scorer.score(&signals.clone()));
    }
}
