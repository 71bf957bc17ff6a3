use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use url::Url;

use super::entry::{Entry, ImageData};

/// A channel shared between its feed, an in-flight parse and readers.
pub type SharedChannel = Arc<RwLock<Channel>>;

/// Metadata and entries of one feed.
///
/// Entries keep document order and are unique under [`Entry`] identity:
/// [`Channel::add_entry`] refuses an entry whose link is already present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Channel {
    pub title: String,
    pub description: String,
    pub link: Option<Url>,
    pub image_url: Option<Url>,
    #[serde(default)]
    pub image: ImageData,
    pub category: Option<String>,
    pub last_build: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip_days: Vec<String>,
    #[serde(default)]
    pub skip_hours: Vec<u8>,
    #[serde(default)]
    entries: Vec<Arc<Entry>>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Arc<Entry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Entry>> {
        self.entries.get(index)
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.entries.iter().any(|e| **e == *entry)
    }

    /// Appends `entry` unless an equal entry is already present.
    ///
    /// Returns `false` (and drops `entry`) on a duplicate; the entry that was
    /// inserted first is the one kept.
    pub fn add_entry(&mut self, entry: Arc<Entry>) -> bool {
        if self.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Drops every entry. Channel metadata is left alone.
    pub fn clear_entries(&mut self) {
        self.entries.clear();
    }

    pub fn into_shared(self) -> SharedChannel {
        Arc::new(RwLock::new(self))
    }
}

/// Read access that survives a panicked writer.
///
/// Writers only ever push or clear whole entries, so a poisoned lock still
/// guards a consistent channel.
pub(crate) fn read(channel: &SharedChannel) -> RwLockReadGuard<'_, Channel> {
    channel.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(channel: &SharedChannel) -> RwLockWriteGuard<'_, Channel> {
    channel.write().unwrap_or_else(PoisonError::into_inner)
}
