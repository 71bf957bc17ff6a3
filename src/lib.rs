//! Concurrent RSS aggregation.
//!
//! Feeds are downloaded and parsed entry by entry into deduplicated
//! channels, their images fetched in the background, and the merged
//! entries exposed through several orderings. Every step of a refresh is
//! reported as a [`feed::FeedEvent`].

pub mod activity;
pub mod collection;
pub mod config;
pub mod feed;
pub mod model;
pub mod store;
pub mod util;

pub use activity::NetworkActivity;
pub use collection::{Collection, OrderingMode, Section};
pub use feed::{EventSink, Feed, FeedEvent, FeedEventKind, Fetcher};
pub use model::{Channel, Entry};
