//! Dense rank assignment.
//!
//! Order: score descending, then `tie_break` descending (catalog rating count,
//! always 0 for reviews), then id ascending. Every position 1..=N is used once.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntity {
    pub id: i64,
    pub score: f64,
    pub tie_break: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntity {
    pub id: i64,
    pub score: f64,
    pub rank: u32,
}

fn rank_order(a: &ScoredEntity, b: &ScoredEntity) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.tie_break.cmp(&a.tie_break))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn assign_dense_ranks(mut scored: Vec<ScoredEntity>) -> Vec<RankedEntity> {
    scored.sort_by(rank_order);

    scored
        .into_iter()
        .zip(1u32..)
        .map(|(entity, rank)| RankedEntity {
            id: entity.id,
            score: entity.score,
            rank,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: i64, score: f64, tie_break: i64) -> ScoredEntity {
        ScoredEntity {
            id,
            score,
            tie_break,
        }
    }

    #[test]
    fn test_ranks_are_dense() {
        let input: Vec<ScoredEntity> = (1..=250)
            .map(|id| scored(id, ((id * 7919) % 97) as f64, id % 3))
            .collect();
        let ranked = assign_dense_ranks(input);

        let mut ranks: Vec<u32> = ranked.iter().map(|r| r.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=250).collect::<Vec<u32>>());
    }

    #[test]
    fn test_highest_score_first() {
        let ranked = assign_dense_ranks(vec![
            scored(1, 10.0, 0),
            scored(2, 30.0, 0),
            scored(3, 20.0, 0),
        ]);
        let ids: Vec<i64> = ranked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn test_catalog_tie_break_prefers_more_ratings_then_lower_id() {
        let ranked = assign_dense_ranks(vec![
            scored(9, 50.0, 3),
            scored(4, 50.0, 10),
            scored(2, 50.0, 3),
        ]);
        let ids: Vec<i64> = ranked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 2, 9]);
    }

    #[test]
    fn test_review_tie_break_by_id() {
        let ranked = assign_dense_ranks(vec![
            scored(30, 1.5, 0),
            scored(10, 1.5, 0),
            scored(20, 1.5, 0),
        ]);
        let ids: Vec<i64> = ranked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_empty_input() {
        assert!(assign_dense_ranks(Vec::new()).is_empty());
    }
}
