//! The trained predictor: indexing, the two EM fits, and the posterior
//! query layer.
//!
//! [`Predictor::fit`] is a one-shot batch operation: it validates the
//! input data (fatal on violations), builds the dense item matrix, trains
//! the item-level mixture, projects ratings onto tags and trains the
//! tag-level mixture, then caches every user's class posterior against the
//! tag model. The returned value is immutable; queries are pure reads and
//! safe to serve concurrently once the value is shared.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use sc_math::tolerant_eq;

use crate::catalog::{Catalog, ItemRecord};
use crate::em::{self, EmConfig, MixtureModel};
use crate::error::{Error, Result};
use crate::index::SymbolIndex;
use crate::matrix::{shift_score, Rating, RatingMatrix, MAX_SCORE, MIN_SCORE};
use crate::tags::derive_tag_matrix;

/// How per-tag score probabilities are combined into one item-level value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagAggregation {
    /// Arithmetic mean across tags. The reference behavior: robust to
    /// items carrying many or few tags.
    #[default]
    Mean,
    /// Product across tags, treating each tag as independent evidence.
    /// Kept as the historical variant; shrinks toward zero as the tag
    /// count grows.
    Product,
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub em: EmConfig,
    pub aggregation: TagAggregation,
}

/// A trained, immutable prediction model.
#[derive(Debug, Clone)]
pub struct Predictor {
    catalog: Catalog,
    users: SymbolIndex,
    items: SymbolIndex,
    tag_index: SymbolIndex,
    item_model: MixtureModel,
    tag_model: MixtureModel,
    /// Cached `log P(Y=k | user)` against the tag model, row-major per
    /// user. Computed once at fit time; queries only read it.
    user_log_posterior: Vec<f64>,
    config: EngineConfig,
}

impl Predictor {
    /// Train the full model over a catalog and rating list.
    ///
    /// Fatal errors (data-integrity tier): blank identifiers, scores
    /// outside [1, 10], ratings referencing items absent from the catalog,
    /// and any training failure. Item records themselves are valid by
    /// construction. Duplicate (user, item) observations keep the last
    /// write.
    pub fn fit(catalog: Catalog, ratings: &[Rating], config: EngineConfig) -> Result<Self> {
        for item in catalog.keys() {
            if item.is_empty() {
                return Err(Error::BlankIdentifier { field: "item" });
            }
        }
        for rating in ratings {
            if rating.user.is_empty() {
                return Err(Error::BlankIdentifier { field: "user" });
            }
            if rating.item.is_empty() {
                return Err(Error::BlankIdentifier { field: "item" });
            }
            if !(MIN_SCORE..=MAX_SCORE).contains(&rating.score) {
                return Err(Error::ScoreOutOfRange {
                    user: rating.user.clone(),
                    item: rating.item.clone(),
                    score: rating.score,
                });
            }
            if !catalog.contains_key(&rating.item) {
                return Err(Error::UnknownRatedItem {
                    user: rating.user.clone(),
                    item: rating.item.clone(),
                });
            }
        }

        let users = SymbolIndex::from_set(ratings.iter().map(|r| r.user.clone()).collect());
        let items = SymbolIndex::from_set(catalog.keys().cloned().collect::<BTreeSet<_>>());

        let mut item_matrix = RatingMatrix::unrated(users.len(), items.len());
        for rating in ratings {
            // Both indices were built from this same data.
            let (Some(user), Some(item)) =
                (users.position(&rating.user), items.position(&rating.item))
            else {
                continue;
            };
            item_matrix.set(user, item, shift_score(rating.score));
        }

        info!(
            users = users.len(),
            items = items.len(),
            ratings = item_matrix.rated_cells(),
            "fitting item-level mixture"
        );
        let item_model = em::fit(&item_matrix, &config.em)?;
        info!(
            log_likelihood = final_likelihood(&item_model),
            "item-level fit complete"
        );

        let item_tags: Vec<Vec<String>> = (0..items.len())
            .map(|position| {
                items
                    .symbol(position)
                    .and_then(|item| catalog.get(item))
                    .map(ItemRecord::tags)
                    .unwrap_or_default()
            })
            .collect();
        let (tag_matrix, tag_index) = derive_tag_matrix(&item_tags, &item_matrix);

        info!(tags = tag_index.len(), "fitting tag-level mixture");
        let tag_model = em::fit(&tag_matrix, &config.em)?;
        info!(
            log_likelihood = final_likelihood(&tag_model),
            "tag-level fit complete"
        );

        let classes = tag_model.classes();
        let mut user_log_posterior = Vec::with_capacity(users.len() * classes);
        for user in 0..users.len() {
            let posterior = tag_model.log_class_posterior(tag_matrix.row(user))?;
            let sum: f64 = posterior.iter().map(|p| p.exp()).sum();
            if !tolerant_eq(sum, 1.0) {
                return Err(Error::Unnormalized {
                    table: "user class posterior",
                    sum,
                });
            }
            user_log_posterior.extend_from_slice(&posterior);
        }

        Ok(Self {
            catalog,
            users,
            items,
            tag_index,
            item_model,
            tag_model,
            user_log_posterior,
            config,
        })
    }

    /// Probability that `user` assigns `score` to the given item.
    ///
    /// Returns `None` (an expected miss, not an error) when the user is
    /// unknown, the score is outside [1, 10], or no metadata is available:
    /// neither supplied explicitly nor resolvable through the catalog.
    /// Explicit `metadata` always takes precedence over catalog lookup,
    /// which is how out-of-catalog items are queried.
    ///
    /// Tags of the item that never occurred in training are skipped; if no
    /// tag is known, there is no evidence to aggregate and the result is
    /// `None`.
    pub fn score_probability(
        &self,
        user: &str,
        score: u8,
        item: Option<&str>,
        metadata: Option<&ItemRecord>,
    ) -> Option<f64> {
        let user = self.users.position(user)?;
        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return None;
        }
        let tags = match metadata {
            Some(record) => record.tags(),
            None => self.catalog.get(item?)?.tags(),
        };

        let classes = self.tag_model.classes();
        let posterior = &self.user_log_posterior[user * classes..(user + 1) * classes];
        let emission = self.tag_model.emission();
        let shifted = shift_score(score) as usize;

        let mut per_tag = Vec::with_capacity(tags.len());
        for tag in &tags {
            let Some(feature) = self.tag_index.position(tag) else {
                continue;
            };
            let marginal: f64 = (0..classes)
                .map(|class| (posterior[class] + emission.get(class, feature, shifted)).exp())
                .sum();
            per_tag.push(marginal);
        }
        if per_tag.is_empty() {
            return None;
        }

        let value = match self.config.aggregation {
            TagAggregation::Mean => per_tag.iter().sum::<f64>() / per_tag.len() as f64,
            TagAggregation::Product => per_tag.iter().product(),
        };
        Some(value.clamp(0.0, 1.0))
    }

    pub fn known_user(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    pub fn known_item(&self, item: &str) -> bool {
        self.items.contains(item)
    }

    /// Indexed users, in stable position order.
    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.symbols()
    }

    /// Indexed items, in stable position order.
    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.items.symbols()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The item-level mixture. Retained for inspection; queries go through
    /// the tag-level model.
    pub fn item_model(&self) -> &MixtureModel {
        &self.item_model
    }

    /// The tag-level mixture backing [`Self::score_probability`].
    pub fn tag_model(&self) -> &MixtureModel {
        &self.tag_model
    }

    /// Trained tag vocabulary, in stable position order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tag_index.symbols()
    }

    /// Cached log class posterior for a known user, against the tag model.
    pub fn log_class_posterior(&self, user: &str) -> Option<&[f64]> {
        let user = self.users.position(user)?;
        let classes = self.tag_model.classes();
        Some(&self.user_log_posterior[user * classes..(user + 1) * classes])
    }
}

fn final_likelihood(model: &MixtureModel) -> f64 {
    model
        .log_likelihood_trace()
        .last()
        .copied()
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ShowType;
    use std::collections::BTreeSet;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn record(show_type: ShowType, episodes: Option<u32>, genre: &str) -> ItemRecord {
        ItemRecord::new(
            show_type,
            "Manga",
            episodes,
            "PG13",
            set(&["Bones"]),
            set(&[genre]),
            24,
            2006,
        )
        .unwrap()
    }

    fn toy_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert("fmab".into(), record(ShowType::Tv, Some(64), "Action"));
        catalog.insert("mob".into(), record(ShowType::Tv, Some(12), "Action"));
        catalog.insert("kimi".into(), record(ShowType::Movie, None, "Romance"));
        catalog
    }

    fn toy_ratings() -> Vec<Rating> {
        vec![
            Rating::new("alice", "fmab", 9),
            Rating::new("alice", "mob", 8),
            Rating::new("bob", "fmab", 2),
            Rating::new("bob", "kimi", 3),
        ]
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            em: EmConfig {
                classes: 4,
                iterations: 24,
                ..EmConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    #[test]
    fn fit_rejects_out_of_range_scores() {
        let ratings = vec![Rating::new("alice", "fmab", 11)];
        let err = Predictor::fit(toy_catalog(), &ratings, small_config()).unwrap_err();
        assert!(matches!(err, Error::ScoreOutOfRange { score: 11, .. }));

        let ratings = vec![Rating::new("alice", "fmab", 0)];
        assert!(Predictor::fit(toy_catalog(), &ratings, small_config()).is_err());
    }

    #[test]
    fn fit_rejects_unknown_items_and_blank_identifiers() {
        let ratings = vec![Rating::new("alice", "not-in-catalog", 5)];
        let err = Predictor::fit(toy_catalog(), &ratings, small_config()).unwrap_err();
        assert!(matches!(err, Error::UnknownRatedItem { .. }));

        let ratings = vec![Rating::new("", "fmab", 5)];
        let err = Predictor::fit(toy_catalog(), &ratings, small_config()).unwrap_err();
        assert!(matches!(err, Error::BlankIdentifier { field: "user" }));

        let ratings = vec![Rating::new("alice", "", 5)];
        assert!(Predictor::fit(toy_catalog(), &ratings, small_config()).is_err());
    }

    #[test]
    fn fit_rejects_empty_input() {
        let err = Predictor::fit(Catalog::new(), &[], small_config()).unwrap_err();
        assert!(matches!(err, Error::EmptyTrainingSet { .. }));
    }

    #[test]
    fn known_lookups() {
        let model = Predictor::fit(toy_catalog(), &toy_ratings(), small_config()).unwrap();
        assert!(model.known_user("alice"));
        assert!(!model.known_user("carol"));
        assert!(model.known_item("fmab"));
        assert!(!model.known_item("nope"));
        assert_eq!(model.users().collect::<Vec<_>>(), vec!["alice", "bob"]);
    }

    #[test]
    fn duplicate_ratings_keep_last_write() {
        let mut ratings = toy_ratings();
        ratings.insert(0, Rating::new("alice", "fmab", 1));
        // The later 9 overwrites the 1, so the fit matches the original.
        let with_duplicate = Predictor::fit(toy_catalog(), &ratings, small_config()).unwrap();
        let without = Predictor::fit(toy_catalog(), &toy_ratings(), small_config()).unwrap();
        for score in MIN_SCORE..=MAX_SCORE {
            assert_eq!(
                with_duplicate.score_probability("alice", score, Some("fmab"), None),
                without.score_probability("alice", score, Some("fmab"), None),
            );
        }
    }

    #[test]
    fn query_misses_are_none() {
        let model = Predictor::fit(toy_catalog(), &toy_ratings(), small_config()).unwrap();
        assert_eq!(model.score_probability("carol", 5, Some("fmab"), None), None);
        assert_eq!(model.score_probability("alice", 0, Some("fmab"), None), None);
        assert_eq!(model.score_probability("alice", 11, Some("fmab"), None), None);
        assert_eq!(model.score_probability("alice", 5, Some("nope"), None), None);
        assert_eq!(model.score_probability("alice", 5, None, None), None);
    }

    #[test]
    fn metadata_bypasses_catalog() {
        let model = Predictor::fit(toy_catalog(), &toy_ratings(), small_config()).unwrap();
        let ad_hoc = record(ShowType::Tv, Some(24), "Action");
        let p = model
            .score_probability("alice", 9, None, Some(&ad_hoc))
            .unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn all_novel_tags_is_a_miss() {
        let model = Predictor::fit(toy_catalog(), &toy_ratings(), small_config()).unwrap();
        let foreign = ItemRecord::new(
            ShowType::Other,
            "Radio",
            None,
            "G",
            set(&["Nowhere Studio"]),
            set(&["Unheard-of"]),
            1,
            1944,
        )
        .unwrap();
        assert_eq!(model.score_probability("alice", 5, None, Some(&foreign)), None);
    }

    #[test]
    fn product_aggregation_stays_in_range() {
        let config = EngineConfig {
            aggregation: TagAggregation::Product,
            ..small_config()
        };
        let model = Predictor::fit(toy_catalog(), &toy_ratings(), config).unwrap();
        for score in MIN_SCORE..=MAX_SCORE {
            let p = model
                .score_probability("alice", score, Some("fmab"), None)
                .unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn cached_posteriors_normalize() {
        let model = Predictor::fit(toy_catalog(), &toy_ratings(), small_config()).unwrap();
        for user in ["alice", "bob"] {
            let posterior = model.log_class_posterior(user).unwrap();
            let sum: f64 = posterior.iter().map(|p| p.exp()).sum();
            assert!(tolerant_eq(sum, 1.0));
        }
        assert!(model.log_class_posterior("carol").is_none());
    }
}
