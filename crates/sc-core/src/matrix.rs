//! Dense user x feature rating matrices.
//!
//! Scores arrive in [1, 10] and are stored shifted to [0, 9]; a cell with
//! no observation holds the [`UNRATED`] sentinel. Keeping the matrix a
//! single primitive type (no `Option` per cell) keeps the EM inner loops a
//! flat scan over bytes.

use serde::{Deserialize, Serialize};

/// Lowest valid raw score.
pub const MIN_SCORE: u8 = 1;
/// Highest valid raw score.
pub const MAX_SCORE: u8 = 10;
/// Number of distinct score levels after shifting to 0-based.
pub const SCORE_LEVELS: usize = (MAX_SCORE - MIN_SCORE + 1) as usize;
/// Sentinel marking a cell with no observed rating. Distinct from every
/// shifted score, which occupy `0..SCORE_LEVELS`.
pub const UNRATED: u8 = u8::MAX;

/// A single rating observation supplied by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub user: String,
    pub item: String,
    pub score: u8,
}

impl Rating {
    pub fn new(user: impl Into<String>, item: impl Into<String>, score: u8) -> Self {
        Self {
            user: user.into(),
            item: item.into(),
            score,
        }
    }
}

/// Shift a raw score in [1, 10] down to its stored form in [0, 9].
#[inline]
pub fn shift_score(score: u8) -> u8 {
    debug_assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
    score - MIN_SCORE
}

/// Dense row-major matrix of shifted scores with [`UNRATED`] sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingMatrix {
    users: usize,
    features: usize,
    cells: Vec<u8>,
}

impl RatingMatrix {
    /// An all-unrated matrix of the given shape.
    pub fn unrated(users: usize, features: usize) -> Self {
        Self {
            users,
            features,
            cells: vec![UNRATED; users * features],
        }
    }

    pub fn users(&self) -> usize {
        self.users
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// Store a shifted score. Later writes overwrite earlier ones, which
    /// gives duplicate (user, item) observations last-write-wins semantics.
    pub fn set(&mut self, user: usize, feature: usize, shifted: u8) {
        debug_assert!((shifted as usize) < SCORE_LEVELS);
        self.cells[user * self.features + feature] = shifted;
    }

    /// Raw cell value: a shifted score or [`UNRATED`].
    pub fn get(&self, user: usize, feature: usize) -> u8 {
        self.cells[user * self.features + feature]
    }

    /// The shifted score, or `None` for an unrated cell.
    pub fn rated(&self, user: usize, feature: usize) -> Option<u8> {
        match self.get(user, feature) {
            UNRATED => None,
            s => Some(s),
        }
    }

    /// One user's full feature row.
    pub fn row(&self, user: usize) -> &[u8] {
        &self.cells[user * self.features..(user + 1) * self.features]
    }

    /// Number of rated cells across the whole matrix.
    pub fn rated_cells(&self) -> usize {
        self.cells.iter().filter(|&&c| c != UNRATED).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_matrix_is_fully_unrated() {
        let m = RatingMatrix::unrated(3, 4);
        assert_eq!(m.users(), 3);
        assert_eq!(m.features(), 4);
        assert_eq!(m.rated_cells(), 0);
        assert_eq!(m.rated(2, 3), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut m = RatingMatrix::unrated(2, 2);
        m.set(1, 0, shift_score(7));
        assert_eq!(m.rated(1, 0), Some(6));
        assert_eq!(m.get(1, 1), UNRATED);
        assert_eq!(m.row(1), &[6, UNRATED]);
        assert_eq!(m.rated_cells(), 1);
    }

    #[test]
    fn last_write_wins() {
        let mut m = RatingMatrix::unrated(1, 1);
        m.set(0, 0, shift_score(3));
        m.set(0, 0, shift_score(9));
        assert_eq!(m.rated(0, 0), Some(8));
    }

    #[test]
    fn sentinel_is_outside_score_range() {
        assert!((UNRATED as usize) >= SCORE_LEVELS);
        assert_eq!(SCORE_LEVELS, 10);
        assert_eq!(shift_score(MIN_SCORE), 0);
        assert_eq!(shift_score(MAX_SCORE), 9);
    }
}
