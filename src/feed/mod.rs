//! Feed download, parsing and image retrieval.
//!
//! - [`fetcher`]: HTTP GET with timeout, size limits and cancellation
//! - [`parser`]: streaming RSS parser that fills a channel entry by entry
//! - [`source`]: [`Feed`], a subscribed URL plus its channel and refresh cycle
//! - [`events`]: observer trait for parsing and the [`FeedEvent`] stream
//!
//! # Example
//!
//! ```ignore
//! use feedloom::feed::{EventSink, Feed, Fetcher, RefreshOptions};
//!
//! let (sink, mut rx) = EventSink::channel();
//! let feed = Feed::new(url);
//! feed.set_event_sink(sink);
//! feed.refresh(&Fetcher::new(client), RefreshOptions::default()).await?;
//! while let Ok(event) = rx.try_recv() {
//!     println!("{:?}", event.kind);
//! }
//! ```

mod dates;
pub mod events;
pub mod fetcher;
mod images;
pub mod parser;
pub mod source;

pub use dates::parse_pub_date;
pub use events::{EventSink, FeedEvent, FeedEventKind, ImageTarget, NoopObserver, ParseObserver};
pub use fetcher::{FetchError, Fetcher};
pub use images::extract_image_url;
pub use parser::{ImageSummary, ParseError, ParseOutcome, Parser};
pub use source::{Feed, RefreshError, RefreshOptions, RefreshSummary};
