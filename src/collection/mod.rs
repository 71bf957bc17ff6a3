//! The set of subscribed feeds and the user's lists over their entries.
//!
//! A [`Collection`] owns the feeds, a favorites list and a blacklist, and
//! derives ordered views across all channels. Refreshing fans out one task
//! per feed; events from every feed flow into the one [`EventSink`] the
//! collection was given, and the shared [`NetworkActivity`] gate counts
//! their downloads.

mod ordering;
mod snapshot;

pub use ordering::{OrderingMode, Section, SortDirection};
pub use snapshot::{CollectionSnapshot, FeedSnapshot};

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use url::Url;

use crate::activity::NetworkActivity;
use crate::feed::{
    EventSink, Feed, Fetcher, RefreshError, RefreshOptions, RefreshSummary,
};
use crate::model::Entry;
use ordering::{sort_alphabetical, sort_chronological};

/// Collection-wide behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct CollectionOptions {
    pub fetch_images: bool,
    pub chronological: SortDirection,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            fetch_images: true,
            chronological: SortDirection::default(),
        }
    }
}

/// Outcome of refreshing one feed.
#[derive(Debug)]
pub struct FeedRefreshResult {
    pub feed: Url,
    pub result: Result<RefreshSummary, RefreshError>,
}

/// Refresh tasks started by [`Collection::refresh`].
///
/// Dropping the batch detaches the tasks; they run to completion and keep
/// delivering events.
#[derive(Debug)]
pub struct RefreshBatch {
    tasks: Vec<(Url, JoinHandle<Result<RefreshSummary, RefreshError>>)>,
}

impl RefreshBatch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every feed, returning results in feed order.
    pub async fn join(self) -> Vec<FeedRefreshResult> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for (feed, handle) in self.tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(RefreshError::TaskFailed(e.to_string())),
            };
            results.push(FeedRefreshResult { feed, result });
        }
        results
    }
}

pub struct Collection {
    feeds: Vec<Arc<Feed>>,
    favorites: Vec<Arc<Entry>>,
    blacklisted: Vec<Arc<Entry>>,
    sink: EventSink,
    activity: NetworkActivity,
    fetcher: Fetcher,
    options: CollectionOptions,
}

impl Collection {
    pub fn new(fetcher: Fetcher) -> Self {
        let activity = NetworkActivity::new();
        Self {
            feeds: Vec::new(),
            favorites: Vec::new(),
            blacklisted: Vec::new(),
            sink: EventSink::default().with_activity(activity.clone()),
            activity,
            fetcher,
            options: CollectionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CollectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Busy gate shared by every feed of this collection.
    pub fn activity(&self) -> &NetworkActivity {
        &self.activity
    }

    /// Routes all feed events to `sink`, including feeds added earlier.
    ///
    /// The collection's activity gate is attached to the sink, replacing
    /// any gate it carried.
    pub fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = sink.with_activity(self.activity.clone());
        for feed in &self.feeds {
            feed.set_event_sink(self.sink.clone());
        }
    }

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------

    pub fn feeds(&self) -> &[Arc<Feed>] {
        &self.feeds
    }

    pub fn feed(&self, url: &Url) -> Option<&Arc<Feed>> {
        self.feeds.iter().find(|f| f.url() == url)
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Subscribes to `url`. Returns `false` if it is already subscribed.
    pub fn add_feed_url(&mut self, url: Url) -> bool {
        self.add_feed(Feed::new(url))
    }

    /// Adds `feed`, wiring it to this collection's event sink. Returns
    /// `false` if a feed with the same URL is already present.
    pub fn add_feed(&mut self, feed: Feed) -> bool {
        if self.feeds.iter().any(|f| **f == feed) {
            tracing::debug!(feed = %feed.url(), "Feed already in collection");
            return false;
        }
        feed.set_event_sink(self.sink.clone());
        tracing::info!(feed = %feed.url(), "Feed added");
        self.feeds.push(Arc::new(feed));
        true
    }

    /// Unsubscribes from `url`. A refresh still running for it is
    /// cancelled.
    pub fn remove_feed_url(&mut self, url: &Url) -> bool {
        let index = self.feeds.iter().position(|f| f.url() == url);
        self.remove_at(index)
    }

    /// Unsubscribes the feed equal to `feed`, cancelling its refresh.
    pub fn remove_feed(&mut self, feed: &Feed) -> bool {
        let index = self.feeds.iter().position(|f| **f == *feed);
        self.remove_at(index)
    }

    fn remove_at(&mut self, index: Option<usize>) -> bool {
        let Some(index) = index else {
            return false;
        };
        let feed = self.feeds.remove(index);
        feed.cancel();
        feed.set_event_sink(EventSink::default());
        tracing::info!(feed = %feed.url(), "Feed removed");
        true
    }

    /// Refreshes every feed concurrently, one task per feed.
    ///
    /// Must be called within a Tokio runtime. A panic inside one feed's
    /// refresh is reported as that feed's [`RefreshError::TaskFailed`] and
    /// does not affect the others.
    pub fn refresh(&self, force: bool) -> RefreshBatch {
        let options = RefreshOptions {
            force,
            fetch_images: self.options.fetch_images,
        };
        tracing::info!(feeds = self.feeds.len(), force, "Refreshing collection");

        let tasks = self
            .feeds
            .iter()
            .map(|feed| {
                let feed = Arc::clone(feed);
                let fetcher = self.fetcher.clone();
                let url = feed.url().clone();
                let handle = tokio::spawn(async move {
                    match catch_task_panic(feed.refresh(&fetcher, options)).await {
                        Ok(result) => result,
                        Err(panic) => {
                            tracing::error!(feed = %feed.url(), panic = %panic, "Refresh task panicked");
                            Err(RefreshError::TaskFailed(panic))
                        }
                    }
                });
                (url, handle)
            })
            .collect();
        RefreshBatch { tasks }
    }

    /// Cancels every running refresh.
    pub fn cancel_all(&self) {
        for feed in &self.feeds {
            feed.cancel();
        }
    }

    /// Removes all feeds and empties the favorites and blacklist.
    ///
    /// Refreshes already running are left alone: they finish against their
    /// own feed and still report to the sink it was wired to.
    pub fn clear(&mut self) {
        self.feeds.clear();
        self.favorites.clear();
        self.blacklisted.clear();
    }

    // ------------------------------------------------------------------
    // Favorites and blacklist
    // ------------------------------------------------------------------

    /// Adds `entry` to the favorites. Returns `false` if it is already a
    /// favorite or has no link to identify it by.
    pub fn add_favorite(&mut self, entry: Arc<Entry>) -> bool {
        insert_unique(&mut self.favorites, entry)
    }

    pub fn remove_favorite(&mut self, entry: &Entry) -> bool {
        remove_matching(&mut self.favorites, entry)
    }

    pub fn is_favorite(&self, entry: &Entry) -> bool {
        self.favorites.iter().any(|f| **f == *entry)
    }

    pub fn favorites(&self) -> &[Arc<Entry>] {
        &self.favorites
    }

    /// Hides `entry` from the alphabetical view. Same rules as
    /// [`Collection::add_favorite`].
    pub fn add_to_blacklist(&mut self, entry: Arc<Entry>) -> bool {
        insert_unique(&mut self.blacklisted, entry)
    }

    pub fn remove_from_blacklist(&mut self, entry: &Entry) -> bool {
        remove_matching(&mut self.blacklisted, entry)
    }

    pub fn is_blacklisted(&self, entry: &Entry) -> bool {
        self.blacklisted.iter().any(|b| **b == *entry)
    }

    pub fn blacklisted(&self) -> &[Arc<Entry>] {
        &self.blacklisted
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Every entry of every feed, feed by feed in document order.
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.feeds.iter().flat_map(|f| f.entries()).collect()
    }

    /// Finds an entry by its link across all feeds.
    pub fn find_entry(&self, link: &str) -> Option<Arc<Entry>> {
        self.feeds
            .iter()
            .flat_map(|f| f.entries())
            .find(|e| e.identity() == Some(link))
    }

    pub fn entries_chronological(&self) -> Vec<Arc<Entry>> {
        let mut entries = self.entries();
        sort_chronological(&mut entries, self.options.chronological);
        entries
    }

    /// Entries by title, blacklisted entries excluded.
    pub fn entries_alphabetical(&self) -> Vec<Arc<Entry>> {
        let mut entries: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|e| !self.is_blacklisted(e))
            .collect();
        sort_alphabetical(&mut entries);
        entries
    }

    /// One section per feed, sorted by channel title.
    pub fn entries_by_channel(&self) -> Vec<Section> {
        let mut sections: Vec<Section> = self
            .feeds
            .iter()
            .map(|f| Section::new(f.channel_title(), f.entries()))
            .collect();
        sections.sort_by(|a, b| a.title.cmp(&b.title));
        sections
    }

    /// Sections for display under `mode`. Empty when the collection has
    /// no feeds.
    pub fn view(&self, mode: OrderingMode) -> Vec<Section> {
        if self.feeds.is_empty() {
            return Vec::new();
        }
        match mode {
            OrderingMode::Chronological => {
                vec![Section::new("Chronological", self.entries_chronological())]
            }
            OrderingMode::Alphabetical => {
                vec![Section::new("Alphabetical", self.entries_alphabetical())]
            }
            OrderingMode::ByChannel => self.entries_by_channel(),
            OrderingMode::Favorites => vec![Section::new("Bookmarked", self.favorites.clone())],
            OrderingMode::BySourceIndex(index) => self
                .feeds
                .get(index)
                .map(|f| vec![Section::new(f.channel_title(), f.entries())])
                .unwrap_or_default(),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            feeds: self
                .feeds
                .iter()
                .map(|f| FeedSnapshot {
                    url: f.url().clone(),
                    channel: crate::model::read_channel(f.channel()).clone(),
                    last_updated: f.last_updated(),
                })
                .collect(),
            favorites: self.favorites.iter().map(|e| Entry::clone(e)).collect(),
            blacklisted: self.blacklisted.iter().map(|e| Entry::clone(e)).collect(),
        }
    }

    /// Rebuilds a collection from `snapshot`. Duplicate feed URLs and
    /// linkless list entries are dropped.
    pub fn from_snapshot(snapshot: CollectionSnapshot, fetcher: Fetcher) -> Self {
        let mut collection = Self::new(fetcher);
        for feed in snapshot.feeds {
            collection.add_feed(Feed::with_channel(feed.url, feed.channel, feed.last_updated));
        }
        for entry in snapshot.favorites {
            collection.add_favorite(Arc::new(entry));
        }
        for entry in snapshot.blacklisted {
            collection.add_to_blacklist(Arc::new(entry));
        }
        collection
    }
}

fn insert_unique(list: &mut Vec<Arc<Entry>>, entry: Arc<Entry>) -> bool {
    if entry.identity().is_none() || list.iter().any(|e| **e == *entry) {
        return false;
    }
    list.push(entry);
    true
}

fn remove_matching(list: &mut Vec<Arc<Entry>>, entry: &Entry) -> bool {
    let before = list.len();
    list.retain(|e| **e != *entry);
    list.len() != before
}

/// Runs `future`, turning a panic into `Err` with the panic message.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            }
        })
}
