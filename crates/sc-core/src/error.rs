//! Error types for the prediction engine.
//!
//! Two tiers, matching the engine contract:
//!
//! - Data-integrity and training failures are fatal [`Error`]s raised from
//!   [`Predictor::fit`](crate::model::Predictor::fit). Continuing past any
//!   of them would silently corrupt the trained tables, so they are never
//!   downgraded to warnings.
//! - Query-time misses (unknown user, unknown item with no metadata,
//!   out-of-range requested score) are ordinary outcomes reported as `None`
//!   from `score_probability`, never as an `Error`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed catalog entries or rating observations.
    Data,
    /// Invalid engine configuration.
    Config,
    /// EM training failures: likelihood regressions, degenerate tables.
    Training,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Data => write!(f, "data"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Training => write!(f, "training"),
        }
    }
}

/// Unified error type for the prediction engine.
#[derive(Error, Debug)]
pub enum Error {
    // Data errors (10-19)
    #[error("invalid item record: {0}")]
    InvalidItem(String),

    #[error("rating by {user:?} references item {item:?} not present in the catalog")]
    UnknownRatedItem { user: String, item: String },

    #[error("blank {field} identifier in input data")]
    BlankIdentifier { field: &'static str },

    #[error("score {score} by {user:?} on {item:?} outside [1, 10]")]
    ScoreOutOfRange {
        user: String,
        item: String,
        score: u8,
    },

    #[error("cannot train on an empty matrix ({users} users x {features} features)")]
    EmptyTrainingSet { users: usize, features: usize },

    // Configuration errors (20-29)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Training errors (30-39)
    #[error("average log-likelihood decreased at iteration {iteration}: {previous} -> {current}")]
    LikelihoodDecreased {
        iteration: usize,
        previous: f64,
        current: f64,
    },

    #[error("{table} does not sum to 1 (got {sum})")]
    Unnormalized { table: &'static str, sum: f64 },

    #[error("numerical instability: {0}")]
    NumericalInstability(String),
}

impl Error {
    /// Stable error code, grouped by category:
    /// 10-19 data, 20-29 configuration, 30-39 training.
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidItem(_) => 10,
            Error::UnknownRatedItem { .. } => 11,
            Error::BlankIdentifier { .. } => 12,
            Error::ScoreOutOfRange { .. } => 13,
            Error::EmptyTrainingSet { .. } => 14,
            Error::InvalidConfig(_) => 20,
            Error::LikelihoodDecreased { .. } => 30,
            Error::Unnormalized { .. } => 31,
            Error::NumericalInstability(_) => 32,
        }
    }

    /// Category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidItem(_)
            | Error::UnknownRatedItem { .. }
            | Error::BlankIdentifier { .. }
            | Error::ScoreOutOfRange { .. }
            | Error::EmptyTrainingSet { .. } => ErrorCategory::Data,

            Error::InvalidConfig(_) => ErrorCategory::Config,

            Error::LikelihoodDecreased { .. }
            | Error::Unnormalized { .. }
            | Error::NumericalInstability(_) => ErrorCategory::Training,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        let data = Error::ScoreOutOfRange {
            user: "u".into(),
            item: "i".into(),
            score: 11,
        };
        assert_eq!(data.code(), 13);
        assert_eq!(data.category(), ErrorCategory::Data);

        let config = Error::InvalidConfig("classes must be at least 1".into());
        assert_eq!(config.code(), 20);
        assert_eq!(config.category(), ErrorCategory::Config);

        let training = Error::LikelihoodDecreased {
            iteration: 3,
            previous: -1.0,
            current: -1.5,
        };
        assert_eq!(training.code(), 30);
        assert_eq!(training.category(), ErrorCategory::Training);
    }

    #[test]
    fn display_includes_offending_values() {
        let err = Error::UnknownRatedItem {
            user: "alice".into(),
            item: "missing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn category_display() {
        assert_eq!(ErrorCategory::Data.to_string(), "data");
        assert_eq!(ErrorCategory::Training.to_string(), "training");
    }
}
