use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{Channel, Entry};

/// Serializable state of a [`super::Collection`].
///
/// Favorites and blacklisted entries are stored by value. After a restore
/// they are separate objects from the channel entries, which is fine
/// because entries are compared by link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    #[serde(default)]
    pub feeds: Vec<FeedSnapshot>,
    #[serde(default)]
    pub favorites: Vec<Entry>,
    #[serde(default)]
    pub blacklisted: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub url: Url,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}
