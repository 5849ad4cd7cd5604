pub mod history;
pub mod persister;
pub mod ranking;
pub mod scoring;
pub mod variation;

pub use history::{RankHistory, HISTORY_CAPACITY};
pub use persister::{BatchPersister, BatchPersisterConfig, PersistReport};
pub use ranking::{assign_dense_ranks, RankedEntity, ScoredEntity};
pub use scoring::{PopularityScorer, ReviewWeights};
pub use variation::{variation, Variation};
