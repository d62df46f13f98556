//! Latent-class score prediction engine.
//!
//! Discovers a small number of latent "user types" from a sparse
//! user x item rating matrix via EM, learns per-tag score distributions
//! conditioned on type, and answers posterior score-probability queries
//! for arbitrary (user, item) pairs. Items never seen by a user, or absent
//! from the catalog entirely, generalize through their derived tag sets.
//!
//! Entry points: [`model::Predictor::fit`] trains over a catalog and
//! rating list in one synchronous batch; [`model::Predictor::score_probability`]
//! answers queries against the frozen model.

pub mod catalog;
pub mod em;
pub mod error;
pub mod index;
pub mod matrix;
pub mod model;
pub mod tags;

pub use catalog::{Catalog, ItemRecord, ShowType};
pub use em::{
    EmConfig, LogEmission, MixtureModel, DEFAULT_CLASSES, DEFAULT_ITERATIONS, DEFAULT_SEED,
};
pub use error::{Error, ErrorCategory, Result};
pub use index::SymbolIndex;
pub use matrix::{
    shift_score, Rating, RatingMatrix, MAX_SCORE, MIN_SCORE, SCORE_LEVELS, UNRATED,
};
pub use model::{EngineConfig, Predictor, TagAggregation};
pub use tags::derive_tag_matrix;
