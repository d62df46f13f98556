//! Tag projection: derives the per-user tag rating matrix from item-level
//! ratings and the items' tag sets.
//!
//! Tags form a denser secondary feature space: many items share a
//! `genre:Action` or `studio:Bones` tag, so a user with only a handful of
//! item ratings still produces evidence for dozens of tags. The derived
//! matrix feeds the same EM core a second time; the resulting tag-level
//! model is what answers queries, including queries about items that were
//! never in the catalog.

use std::collections::BTreeSet;

use tracing::debug;

use crate::index::SymbolIndex;
use crate::matrix::{RatingMatrix, MIN_SCORE};

/// Derive the tag rating matrix and tag index from an item rating matrix.
///
/// `item_tags[f]` must hold the tag set of the item at column `f` of
/// `item_matrix`. The tag universe is the union of tags over items rated
/// by at least one user; a catalog tag nobody's ratings support would keep
/// its randomly initialized emission row through training, so it is left
/// out of the index and treated as novel at query time.
///
/// A user's score for a tag is the rounded mean (half away from zero) of
/// their raw scores over rated items carrying the tag; zero rated support
/// leaves the cell unrated. Output is deterministic: the index is sorted
/// and the aggregation order cannot affect the per-tag sums.
pub fn derive_tag_matrix(
    item_tags: &[Vec<String>],
    item_matrix: &RatingMatrix,
) -> (RatingMatrix, SymbolIndex) {
    debug_assert_eq!(item_tags.len(), item_matrix.features());
    let users = item_matrix.users();
    let features = item_matrix.features();

    let mut rated_by_anyone = vec![false; features];
    for user in 0..users {
        for (feature, flag) in rated_by_anyone.iter_mut().enumerate() {
            if item_matrix.rated(user, feature).is_some() {
                *flag = true;
            }
        }
    }

    let mut supported: BTreeSet<String> = BTreeSet::new();
    for (feature, tags) in item_tags.iter().enumerate() {
        if rated_by_anyone[feature] {
            supported.extend(tags.iter().cloned());
        }
    }
    let tag_index = SymbolIndex::from_set(supported);
    debug!(tags = tag_index.len(), "derived tag universe");

    let mut matrix = RatingMatrix::unrated(users, tag_index.len());
    let mut sums = vec![0.0_f64; tag_index.len()];
    let mut counts = vec![0_u32; tag_index.len()];
    for user in 0..users {
        sums.fill(0.0);
        counts.fill(0);
        for feature in 0..features {
            let Some(shifted) = item_matrix.rated(user, feature) else {
                continue;
            };
            let raw = (shifted + MIN_SCORE) as f64;
            for tag in &item_tags[feature] {
                // Index misses cannot happen for rated features; guard anyway.
                let Some(position) = tag_index.position(tag) else {
                    continue;
                };
                sums[position] += raw;
                counts[position] += 1;
            }
        }
        for (position, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let mean = sums[position] / count as f64;
            matrix.set(user, position, mean.round() as u8 - MIN_SCORE);
        }
    }

    (matrix, tag_index)
}
