//! Catalog item records and their derived tag sets.
//!
//! An [`ItemRecord`] is the fixed-size metadata record the ingestion layer
//! supplies for every item. Construction enforces the field invariants up
//! front (episode count present exactly for TV shows, non-empty studio and
//! genre sets), so a value of this type is valid by construction and the
//! training pipeline never re-validates records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Catalog supplied by the ingestion layer: item identifier to metadata.
///
/// A `BTreeMap` keeps item iteration order sorted, which makes item
/// indexing independent of how the caller assembled the map.
pub type Catalog = BTreeMap<String, ItemRecord>;

/// Broadcast format of a show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShowType {
    #[serde(rename = "TV")]
    Tv,
    Movie,
    #[serde(rename = "OVA")]
    Ova,
    Special,
    Other,
}

impl fmt::Display for ShowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShowType::Tv => write!(f, "TV"),
            ShowType::Movie => write!(f, "Movie"),
            ShowType::Ova => write!(f, "OVA"),
            ShowType::Special => write!(f, "Special"),
            ShowType::Other => write!(f, "Other"),
        }
    }
}

impl FromStr for ShowType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TV" => Ok(ShowType::Tv),
            "Movie" => Ok(ShowType::Movie),
            "OVA" => Ok(ShowType::Ova),
            "Special" => Ok(ShowType::Special),
            "Other" => Ok(ShowType::Other),
            other => Err(Error::InvalidItem(format!("unknown show type {other:?}"))),
        }
    }
}

/// Immutable metadata for a single catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawItemRecord")]
pub struct ItemRecord {
    show_type: ShowType,
    source: String,
    /// Present iff `show_type` is [`ShowType::Tv`].
    episodes: Option<u32>,
    age_rating: String,
    studios: BTreeSet<String>,
    genres: BTreeSet<String>,
    duration_minutes: u32,
    start_year: i32,
}

impl ItemRecord {
    /// Build a record, validating the field-completeness invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        show_type: ShowType,
        source: impl Into<String>,
        episodes: Option<u32>,
        age_rating: impl Into<String>,
        studios: BTreeSet<String>,
        genres: BTreeSet<String>,
        duration_minutes: u32,
        start_year: i32,
    ) -> Result<Self> {
        let source = source.into();
        let age_rating = age_rating.into();

        if source.is_empty() {
            return Err(Error::InvalidItem("source must not be empty".into()));
        }
        if age_rating.is_empty() {
            return Err(Error::InvalidItem("age rating must not be empty".into()));
        }
        match (show_type, episodes) {
            (ShowType::Tv, None) => {
                return Err(Error::InvalidItem(
                    "TV shows require an episode count".into(),
                ));
            }
            (t, Some(_)) if t != ShowType::Tv => {
                return Err(Error::InvalidItem(format!(
                    "episode count is only valid for TV shows, not {t}"
                )));
            }
            _ => {}
        }
        if studios.is_empty() || studios.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidItem(
                "at least one non-empty studio is required".into(),
            ));
        }
        if genres.is_empty() || genres.iter().any(|g| g.is_empty()) {
            return Err(Error::InvalidItem(
                "at least one non-empty genre is required".into(),
            ));
        }

        Ok(Self {
            show_type,
            source,
            episodes,
            age_rating,
            studios,
            genres,
            duration_minutes,
            start_year,
        })
    }

    pub fn show_type(&self) -> ShowType {
        self.show_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn episodes(&self) -> Option<u32> {
        self.episodes
    }

    pub fn age_rating(&self) -> &str {
        &self.age_rating
    }

    pub fn studios(&self) -> &BTreeSet<String> {
        &self.studios
    }

    pub fn genres(&self) -> &BTreeSet<String> {
        &self.genres
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    /// Derived tag set: one tag per scalar field plus one per studio and
    /// one per genre member.
    ///
    /// The order is fixed (scalars, then sorted studios, then sorted
    /// genres), so two records with equal fields yield equal tag vectors.
    /// Non-TV records carry no episode tag.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![
            format!("type:{}", self.show_type),
            format!("source:{}", self.source),
        ];
        if let Some(n) = self.episodes {
            tags.push(format!("episodes:{n}"));
        }
        tags.push(format!("rating:{}", self.age_rating));
        tags.extend(self.studios.iter().map(|s| format!("studio:{s}")));
        tags.extend(self.genres.iter().map(|g| format!("genre:{g}")));
        tags.push(format!("duration:{}", self.duration_minutes));
        tags.push(format!("year:{}", self.start_year));
        tags
    }
}

/// Mirror struct used so deserialized records go through the same
/// validation as [`ItemRecord::new`].
#[derive(Deserialize)]
struct RawItemRecord {
    show_type: ShowType,
    source: String,
    #[serde(default)]
    episodes: Option<u32>,
    age_rating: String,
    studios: BTreeSet<String>,
    genres: BTreeSet<String>,
    duration_minutes: u32,
    start_year: i32,
}

impl TryFrom<RawItemRecord> for ItemRecord {
    type Error = Error;

    fn try_from(raw: RawItemRecord) -> Result<Self> {
        ItemRecord::new(
            raw.show_type,
            raw.source,
            raw.episodes,
            raw.age_rating,
            raw.studios,
            raw.genres,
            raw.duration_minutes,
            raw.start_year,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn tv_record() -> ItemRecord {
        ItemRecord::new(
            ShowType::Tv,
            "Manga",
            Some(26),
            "PG13",
            set(&["Sunrise"]),
            set(&["Action", "Drama"]),
            24,
            1998,
        )
        .unwrap()
    }

    #[test]
    fn tv_requires_episode_count() {
        let err = ItemRecord::new(
            ShowType::Tv,
            "Manga",
            None,
            "PG13",
            set(&["Sunrise"]),
            set(&["Action"]),
            24,
            1998,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidItem(_)));
    }

    #[test]
    fn non_tv_rejects_episode_count() {
        let err = ItemRecord::new(
            ShowType::Movie,
            "Original",
            Some(1),
            "PG13",
            set(&["Ghibli"]),
            set(&["Fantasy"]),
            120,
            2001,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidItem(_)));
    }

    #[test]
    fn empty_studio_or_genre_rejected() {
        assert!(ItemRecord::new(
            ShowType::Movie,
            "Original",
            None,
            "PG13",
            BTreeSet::new(),
            set(&["Fantasy"]),
            120,
            2001,
        )
        .is_err());
        assert!(ItemRecord::new(
            ShowType::Movie,
            "Original",
            None,
            "PG13",
            set(&["Ghibli"]),
            BTreeSet::new(),
            120,
            2001,
        )
        .is_err());
    }

    #[test]
    fn tags_cover_every_field() {
        let tags = tv_record().tags();
        assert_eq!(
            tags,
            vec![
                "type:TV",
                "source:Manga",
                "episodes:26",
                "rating:PG13",
                "studio:Sunrise",
                "genre:Action",
                "genre:Drama",
                "duration:24",
                "year:1998",
            ]
        );
    }

    #[test]
    fn non_tv_has_no_episode_tag() {
        let record = ItemRecord::new(
            ShowType::Movie,
            "Original",
            None,
            "PG",
            set(&["Ghibli"]),
            set(&["Fantasy"]),
            120,
            2001,
        )
        .unwrap();
        assert!(!record.tags().iter().any(|t| t.starts_with("episodes:")));
        assert!(record.tags().contains(&"type:Movie".to_string()));
    }

    #[test]
    fn equal_records_have_equal_tags() {
        assert_eq!(tv_record().tags(), tv_record().tags());
    }

    #[test]
    fn show_type_round_trips_through_display() {
        for t in [
            ShowType::Tv,
            ShowType::Movie,
            ShowType::Ova,
            ShowType::Special,
            ShowType::Other,
        ] {
            assert_eq!(t.to_string().parse::<ShowType>().unwrap(), t);
        }
        assert!("tv".parse::<ShowType>().is_err());
    }

    #[test]
    fn deserialization_validates() {
        let bad = serde_json::json!({
            "show_type": "TV",
            "source": "Manga",
            "age_rating": "PG13",
            "studios": ["Sunrise"],
            "genres": ["Action"],
            "duration_minutes": 24,
            "start_year": 1998,
        });
        // Missing episode count for a TV show must be rejected.
        assert!(serde_json::from_value::<ItemRecord>(bad).is_err());

        let good = serde_json::to_value(tv_record()).unwrap();
        let back: ItemRecord = serde_json::from_value(good).unwrap();
        assert_eq!(back, tv_record());
    }
}
