use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::model::Entry;

/// Direction of the chronological view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// How [`super::Collection::view`] groups entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingMode {
    /// One section holding every entry, by publication date.
    Chronological,
    /// One section, by title, with blacklisted entries left out.
    Alphabetical,
    /// One section per feed, feeds ordered by channel title.
    ByChannel,
    /// The favorites list in the order entries were favorited.
    Favorites,
    /// The entries of the feed at this index, in document order.
    BySourceIndex(usize),
}

impl OrderingMode {
    /// Parses a CLI-style mode name: `chronological`, `alphabetical`,
    /// `channel`, `favorites` or a feed index.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chronological" | "date" => Some(Self::Chronological),
            "alphabetical" | "title" => Some(Self::Alphabetical),
            "channel" | "by-channel" => Some(Self::ByChannel),
            "favorites" | "bookmarked" => Some(Self::Favorites),
            other => other.parse().ok().map(Self::BySourceIndex),
        }
    }
}

/// A headed group of entries, one per table section.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub entries: Vec<Arc<Entry>>,
}

impl Section {
    pub fn new(title: impl Into<String>, entries: Vec<Arc<Entry>>) -> Self {
        Self {
            title: title.into(),
            entries,
        }
    }
}

/// Stable sort by publication date. Entries without a date go last in
/// both directions.
pub(crate) fn sort_chronological(entries: &mut [Arc<Entry>], direction: SortDirection) {
    entries.sort_by(|a, b| match (a.published, b.published) {
        (Some(a), Some(b)) => match direction {
            SortDirection::OldestFirst => a.cmp(&b),
            SortDirection::NewestFirst => b.cmp(&a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Stable, case-sensitive sort by title.
pub(crate) fn sort_alphabetical(entries: &mut [Arc<Entry>]) {
    entries.sort_by(|a, b| a.title.cmp(&b.title));
}
