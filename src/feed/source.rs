use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::events::{EventSink, FeedEventKind, ImageTarget, ParseObserver};
use super::fetcher::{FetchError, Fetcher};
use super::parser::{ParseError, Parser};
use crate::model::{read_channel, write_channel, Channel, Entry, SharedChannel};

/// Why a refresh did not complete.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Another refresh of the same feed is still running.
    #[error("Feed is already refreshing")]
    AlreadyRefreshing,
    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),
    /// Entries committed before the error remain in the channel.
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
    /// The refresh task panicked or was aborted.
    #[error("Refresh task failed: {0}")]
    TaskFailed(String),
}

/// Options for one refresh.
#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    /// Drop all entries before merging the downloaded document.
    pub force: bool,
    /// Download entry and channel images after parsing.
    pub fetch_images: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            force: false,
            fetch_images: true,
        }
    }
}

/// What a successful refresh did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub images_loaded: usize,
    pub images_failed: usize,
}

/// One subscribed source: a URL and the channel built from it.
///
/// A feed is shared as `Arc<Feed>`; all operations take `&self`. At most
/// one refresh runs at a time, a second concurrent call is rejected with
/// [`RefreshError::AlreadyRefreshing`].
pub struct Feed {
    url: Url,
    channel: SharedChannel,
    last_updated: Mutex<Option<DateTime<Utc>>>,
    sink: RwLock<EventSink>,
    refreshing: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl Feed {
    pub fn new(url: Url) -> Self {
        Self::with_channel(url, Channel::new(), None)
    }

    /// Rebuilds a feed from persisted state.
    pub fn with_channel(url: Url, channel: Channel, last_updated: Option<DateTime<Utc>>) -> Self {
        Self {
            url,
            channel: channel.into_shared(),
            last_updated: Mutex::new(last_updated),
            sink: RwLock::new(EventSink::default()),
            refreshing: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Shared handle to the channel. Readers see entries appear while a
    /// refresh is parsing.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    pub fn set_event_sink(&self, sink: EventSink) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn event_sink(&self) -> EventSink {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Time of the last refresh that parsed successfully.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self
            .last_updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Aborts the running refresh, if any. The pending download or image
    /// fetches end with [`FetchError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Downloads the document, merges it into the channel and fetches
    /// images.
    ///
    /// Events go to the current sink in this order: `DownloadBegin`, then
    /// `DownloadFailure` (end) or `DownloadSuccess`, then the parse events,
    /// `Updated`, and finally image events. No retries are attempted.
    pub async fn refresh(
        &self,
        fetcher: &Fetcher,
        options: RefreshOptions,
    ) -> Result<RefreshSummary, RefreshError> {
        let _guard = RefreshGuard::acquire(&self.refreshing).ok_or_else(|| {
            tracing::debug!(feed = %self.url, "Refresh already in progress");
            RefreshError::AlreadyRefreshing
        })?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        let sink = self.event_sink();
        sink.emit(&self.url, FeedEventKind::DownloadBegin);

        let bytes = match fetcher.fetch_feed(&self.url, &cancel).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(feed = %self.url, error = %e, "Feed download failed");
                sink.emit(
                    &self.url,
                    FeedEventKind::DownloadFailure {
                        error: e.to_string(),
                    },
                );
                return Err(e.into());
            }
        };
        sink.emit(&self.url, FeedEventKind::DownloadSuccess);

        if options.force {
            write_channel(&self.channel).clear_entries();
        }

        let forwarder = Arc::new(EventForwarder {
            url: self.url.clone(),
            channel: Arc::clone(&self.channel),
            sink: sink.clone(),
        });
        let parser = Parser::new(Arc::clone(&self.channel), forwarder).with_base_url(self.url.clone());
        let outcome = parser.parse(&bytes)?;

        if !outcome.saw_channel {
            tracing::info!(feed = %self.url, "Document has no <channel> element");
            sink.emit(&self.url, FeedEventKind::InvalidFeed);
        }
        *self
            .last_updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        sink.emit(
            &self.url,
            FeedEventKind::Updated {
                added: outcome.added,
            },
        );

        let mut summary = RefreshSummary {
            added: outcome.added,
            ..RefreshSummary::default()
        };
        if options.fetch_images {
            let images = parser.download_images(&outcome, fetcher, &cancel).await;
            summary.images_loaded = images.loaded;
            summary.images_failed = images.failed;
        }

        tracing::info!(
            feed = %self.url,
            added = summary.added,
            images = summary.images_loaded,
            "Feed refreshed"
        );
        Ok(summary)
    }

    /// Snapshot of the channel's entries in insertion order.
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        read_channel(&self.channel).entries().to_vec()
    }

    pub fn len(&self) -> usize {
        read_channel(&self.channel).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_title(&self) -> String {
        read_channel(&self.channel).title.clone()
    }

    pub fn channel_link(&self) -> Option<Url> {
        read_channel(&self.channel).link.clone()
    }

    /// Distinct non-empty entry categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        read_channel(&self.channel)
            .entries()
            .iter()
            .filter(|e| !e.category.is_empty())
            .map(|e| e.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn filter_by_category(&self, category: &str) -> Vec<Arc<Entry>> {
        self.filter(|e| e.category == category)
    }

    pub fn filter_by_author(&self, author: &str) -> Vec<Arc<Entry>> {
        self.filter(|e| e.author == author)
    }

    fn filter(&self, keep: impl Fn(&Entry) -> bool) -> Vec<Arc<Entry>> {
        read_channel(&self.channel)
            .entries()
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }
}

/// Feeds are the same subscription when their URLs match.
impl PartialEq for Feed {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Feed {}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("url", &self.url.as_str())
            .field("entries", &self.len())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

/// Holds the single-flight flag for the duration of a refresh.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Turns parser callbacks into feed events, attaching the entry an image
/// event refers to.
struct EventForwarder {
    url: Url,
    channel: SharedChannel,
    sink: EventSink,
}

impl EventForwarder {
    fn entry(&self, target: ImageTarget) -> Option<Arc<Entry>> {
        match target {
            ImageTarget::Channel => None,
            ImageTarget::Entry(index) => read_channel(&self.channel).get(index).cloned(),
        }
    }
}

impl ParseObserver for EventForwarder {
    fn begin_parsing(&self) {
        self.sink.emit(&self.url, FeedEventKind::BeginParsing);
    }

    fn complete_parsing(&self) {
        self.sink.emit(&self.url, FeedEventKind::CompleteParsing);
    }

    fn begin_image_download(&self, target: ImageTarget) {
        let entry = self.entry(target);
        self.sink
            .emit(&self.url, FeedEventKind::BeginImageDownload { target, entry });
    }

    fn image_download_success(&self, target: ImageTarget) {
        let entry = self.entry(target);
        self.sink
            .emit(&self.url, FeedEventKind::ImageDownloaded { target, entry });
    }

    fn image_download_failure(&self, target: ImageTarget) {
        let entry = self.entry(target);
        self.sink
            .emit(&self.url, FeedEventKind::ImageDownloadFailed { target, entry });
    }

    fn parse_error(&self, error: &ParseError) {
        self.sink.emit(
            &self.url,
            FeedEventKind::ParseError {
                message: error.to_string(),
            },
        );
    }

    fn validation_error(&self, message: &str) {
        self.sink.emit(
            &self.url,
            FeedEventKind::ValidationError {
                message: message.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::NetworkActivity;
    use crate::feed::FeedEvent;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<rss><channel><title>Blog</title>
        <item><title>One</title><link>http://x/1</link><category>rust</category><author>ann</author></item>
        <item><title>Two</title><link>http://x/2</link><category>go</category><author>bob</author></item>
        <item><title>Three</title><link>http://x/3</link><category>rust</category><author>ann</author></item>
    </channel></rss>"#;

    async fn serve(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn feed_of(server: &MockServer) -> Feed {
        Feed::new(Url::parse(&format!("{}/feed.xml", server.uri())).unwrap())
    }

    fn drain(rx: &mut UnboundedReceiver<FeedEvent>) -> Vec<FeedEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_refresh_populates_channel_and_emits_in_order() {
        let server = serve(FEED).await;
        let feed = feed_of(&server);
        let (sink, mut rx) = EventSink::channel();
        feed.set_event_sink(sink);

        let summary = feed.refresh(&fetcher(), RefreshOptions::default()).await.unwrap();
        assert_eq!(summary.added, 3);
        assert_eq!(feed.channel_title(), "Blog");
        assert!(feed.last_updated().is_some());

        let kinds = drain(&mut rx);
        assert!(matches!(
            kinds.as_slice(),
            [
                FeedEventKind::DownloadBegin,
                FeedEventKind::DownloadSuccess,
                FeedEventKind::BeginParsing,
                FeedEventKind::CompleteParsing,
                FeedEventKind::Updated { added: 3 },
            ]
        ));
    }

    #[tokio::test]
    async fn test_second_refresh_adds_nothing() {
        let server = serve(FEED).await;
        let feed = feed_of(&server);
        feed.refresh(&fetcher(), RefreshOptions::default()).await.unwrap();
        let again = feed.refresh(&fetcher(), RefreshOptions::default()).await.unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(feed.len(), 3);
    }

    #[tokio::test]
    async fn test_force_refresh_rebuilds_entries() {
        let server = serve(FEED).await;
        let feed = feed_of(&server);
        feed.refresh(&fetcher(), RefreshOptions::default()).await.unwrap();
        let forced = feed
            .refresh(
                &fetcher(),
                RefreshOptions {
                    force: true,
                    ..RefreshOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(forced.added, 3);
        assert_eq!(feed.len(), 3);
    }

    #[tokio::test]
    async fn test_download_failure_leaves_channel_untouched() {
        let server = MockServer::start().await;
        Mock::given(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let feed = feed_of(&server);
        let activity = NetworkActivity::new();
        let (sink, mut rx) = EventSink::channel();
        feed.set_event_sink(sink.with_activity(activity.clone()));

        let result = feed.refresh(&fetcher(), RefreshOptions::default()).await;
        assert!(matches!(
            result,
            Err(RefreshError::Fetch(FetchError::HttpStatus(500)))
        ));
        assert!(feed.is_empty());
        assert!(feed.last_updated().is_none());
        assert!(!activity.is_busy());

        let kinds = drain(&mut rx);
        assert_eq!(kinds.len(), 2);
        assert!(matches!(kinds[1], FeedEventKind::DownloadFailure { .. }));
    }

    #[tokio::test]
    async fn test_parse_error_keeps_committed_entries() {
        let truncated = "<rss><channel><item><title>One</title><link>http://x/1</link></item><item><title>Tw";
        let server = serve(truncated).await;
        let feed = feed_of(&server);
        let (sink, mut rx) = EventSink::channel();
        feed.set_event_sink(sink);

        let result = feed.refresh(&fetcher(), RefreshOptions::default()).await;
        assert!(matches!(result, Err(RefreshError::Parse(_))));
        assert_eq!(feed.len(), 1);

        let kinds = drain(&mut rx);
        assert!(kinds
            .iter()
            .any(|k| matches!(k, FeedEventKind::ParseError { .. })));
        assert!(!kinds
            .iter()
            .any(|k| matches!(k, FeedEventKind::Updated { .. } | FeedEventKind::CompleteParsing)));
    }

    #[tokio::test]
    async fn test_document_without_channel_is_flagged() {
        let server = serve("<html><body>Not a feed</body></html>").await;
        let feed = feed_of(&server);
        let (sink, mut rx) = EventSink::channel();
        feed.set_event_sink(sink);

        let summary = feed.refresh(&fetcher(), RefreshOptions::default()).await.unwrap();
        assert_eq!(summary.added, 0);
        assert!(drain(&mut rx)
            .iter()
            .any(|k| matches!(k, FeedEventKind::InvalidFeed)));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_rejected() {
        let server = MockServer::start().await;
        Mock::given(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FEED)
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        let feed = Arc::new(feed_of(&server));

        let first = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.refresh(&fetcher(), RefreshOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(feed.is_refreshing());

        let second = feed.refresh(&fetcher(), RefreshOptions::default()).await;
        assert!(matches!(second, Err(RefreshError::AlreadyRefreshing)));

        assert_eq!(first.await.unwrap().unwrap().added, 3);
        assert!(!feed.is_refreshing());
    }

    #[tokio::test]
    async fn test_cancel_aborts_download() {
        let server = MockServer::start().await;
        Mock::given(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FEED)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        let feed = Arc::new(feed_of(&server));

        let task = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.refresh(&fetcher(), RefreshOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        feed.cancel();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(RefreshError::Fetch(FetchError::Cancelled))
        ));
    }

    #[test]
    fn test_feeds_equal_by_url() {
        let url = Url::parse("http://example.com/feed.xml").unwrap();
        let mut channel = Channel::new();
        channel.title = "Restored".to_string();

        let fresh = Feed::new(url.clone());
        let restored = Feed::with_channel(url, channel, Some(Utc::now()));
        assert_eq!(fresh, restored);
        assert_ne!(fresh, Feed::new(Url::parse("http://example.com/other.xml").unwrap()));
    }

    #[tokio::test]
    async fn test_category_and_author_helpers() {
        let server = serve(FEED).await;
        let feed = feed_of(&server);
        feed.refresh(&fetcher(), RefreshOptions::default()).await.unwrap();

        assert_eq!(feed.categories(), vec!["go", "rust"]);
        let titles: Vec<_> = feed
            .filter_by_category("rust")
            .iter()
            .map(|e| e.title.clone())
            .collect();
        assert_eq!(titles, vec!["One", "Three"]);
        assert_eq!(feed.filter_by_author("bob").len(), 1);
    }
}
