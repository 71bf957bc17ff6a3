//! Observer contracts for parsing and feed refresh.
//!
//! Parsing reports through the [`ParseObserver`] trait: every method must
//! be implemented, so "not interested" is always an explicit empty body.
//! Feed refreshes report outward as [`FeedEvent`] values sent over an
//! unbounded `tokio::sync::mpsc` channel. Whoever owns the receiver is the
//! serial delivery context: events from concurrently refreshing feeds and
//! image tasks arrive there one at a time, so observers never need their
//! own synchronization.

use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use super::parser::ParseError;
use crate::activity::NetworkActivity;
use crate::model::Entry;

/// Which image an image event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTarget {
    /// The channel-level image (`<channel><image><url>`).
    Channel,
    /// The image of the entry at this index of the channel.
    Entry(usize),
}

/// Receives parse lifecycle notifications.
///
/// For one parse the order is: `begin_parsing`, then either
/// `complete_parsing` or `parse_error`, then (only after completion) for
/// each image candidate `begin_image_download` followed by exactly one of
/// `image_download_success` / `image_download_failure`. Image completions
/// of different targets may interleave in any order.
///
/// Image callbacks run on spawned tasks, hence `Send + Sync`.
pub trait ParseObserver: Send + Sync {
    fn begin_parsing(&self);
    fn complete_parsing(&self);
    fn begin_image_download(&self, target: ImageTarget);
    fn image_download_success(&self, target: ImageTarget);
    fn image_download_failure(&self, target: ImageTarget);
    /// The document is not well-formed. Parsing stopped at the error.
    fn parse_error(&self, error: &ParseError);
    /// The document is well-formed but breaks the channel/item structure
    /// at some point. Parsing continues.
    fn validation_error(&self, message: &str);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ParseObserver for NoopObserver {
    fn begin_parsing(&self) {}
    fn complete_parsing(&self) {}
    fn begin_image_download(&self, _target: ImageTarget) {}
    fn image_download_success(&self, _target: ImageTarget) {}
    fn image_download_failure(&self, _target: ImageTarget) {}
    fn parse_error(&self, _error: &ParseError) {}
    fn validation_error(&self, _message: &str) {}
}

/// A feed lifecycle notification.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    /// Source URL of the feed this event belongs to.
    pub feed: Url,
    pub kind: FeedEventKind,
}

#[derive(Debug, Clone)]
pub enum FeedEventKind {
    DownloadBegin,
    DownloadSuccess,
    DownloadFailure { error: String },
    BeginParsing,
    CompleteParsing,
    ParseError { message: String },
    ValidationError { message: String },
    /// The document was parsed and merged into the channel.
    Updated { added: usize },
    /// `entry` is `None` for the channel image.
    BeginImageDownload {
        target: ImageTarget,
        entry: Option<Arc<Entry>>,
    },
    ImageDownloaded {
        target: ImageTarget,
        entry: Option<Arc<Entry>>,
    },
    ImageDownloadFailed {
        target: ImageTarget,
        entry: Option<Arc<Entry>>,
    },
    /// The response parsed cleanly but contained no `<channel>`.
    /// Informational; what to do about it is up to the observer.
    InvalidFeed,
}

impl FeedEventKind {
    /// Change this event makes to the in-flight network operation count.
    fn activity_delta(&self) -> i8 {
        match self {
            Self::DownloadBegin | Self::BeginImageDownload { .. } => 1,
            Self::DownloadSuccess
            | Self::DownloadFailure { .. }
            | Self::ImageDownloaded { .. }
            | Self::ImageDownloadFailed { .. } => -1,
            _ => 0,
        }
    }
}

/// Where a feed delivers its events.
///
/// Cheap to clone. Both halves are optional: a sink with neither simply
/// drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<FeedEvent>>,
    activity: Option<NetworkActivity>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self {
            tx: Some(tx),
            activity: None,
        }
    }

    /// Creates a sink plus the receiving end of its event channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn with_activity(mut self, activity: NetworkActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn activity(&self) -> Option<&NetworkActivity> {
        self.activity.as_ref()
    }

    /// Adjusts the activity gate for `kind`, then delivers the event.
    pub fn emit(&self, feed: &Url, kind: FeedEventKind) {
        if let Some(activity) = &self.activity {
            match kind.activity_delta() {
                1 => activity.begin(),
                -1 => activity.end(),
                _ => {}
            }
        }

        if let Some(tx) = &self.tx {
            if tx
                .send(FeedEvent {
                    feed: feed.clone(),
                    kind,
                })
                .is_err()
            {
                tracing::debug!(feed = %feed, "Event receiver dropped, event discarded");
            }
        }
    }
}
