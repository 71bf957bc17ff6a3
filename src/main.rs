use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use feedloom::collection::{Collection, OrderingMode};
use feedloom::config::Config;
use feedloom::feed::{EventSink, FeedEvent, FeedEventKind, ImageTarget};
use feedloom::model::Entry;
use feedloom::store;
use feedloom::util::{strip_control_chars, truncate_to_width, validate_feed_url};

/// Width titles are cut to in listings.
const TITLE_WIDTH: usize = 72;

/// Get the config directory path (~/.config/feedloom/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedloom"))
}

#[derive(Parser, Debug)]
#[command(name = "feedloom", about = "Concurrent RSS aggregator", version)]
struct Args {
    /// Config file (default: ~/.config/feedloom/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add { url: String },
    /// Unsubscribe from a feed
    Remove { url: String },
    /// List subscribed feeds
    List,
    /// Download every feed and merge new entries
    Refresh {
        /// Drop existing entries before merging
        #[arg(long)]
        force: bool,
    },
    /// Print entries
    Show {
        /// chronological, alphabetical, channel, favorites, or a feed index
        #[arg(long, default_value = "chronological")]
        order: String,
        /// Maximum entries per section
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Bookmark an entry by its link
    Favorite { link: String },
    /// Remove a bookmark
    Unfavorite { link: String },
    /// Hide an entry from the alphabetical listing
    Hide { link: String },
    /// Show a hidden entry again
    Unhide { link: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_private_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let state_path = config.state_path(&config_dir);

    let snapshot = store::load(&state_path).context("Failed to load saved feeds")?;
    let fetcher = config.fetcher().context("Failed to set up HTTP client")?;
    let mut collection =
        Collection::from_snapshot(snapshot, fetcher).with_options(config.collection_options());

    let changed = match args.command {
        Command::Add { url } => {
            let url = validate_feed_url(&url, config.allow_private_hosts)
                .with_context(|| format!("Cannot subscribe to '{}'", url))?;
            if collection.add_feed_url(url.clone()) {
                println!("Added {}", url);
                true
            } else {
                println!("Already subscribed to {}", url);
                false
            }
        }
        Command::Remove { url } => {
            let url = Url::parse(url.trim()).context("Invalid URL")?;
            if !collection.remove_feed_url(&url) {
                anyhow::bail!("Not subscribed to {}", url);
            }
            println!("Removed {}", url);
            true
        }
        Command::List => {
            list_feeds(&collection);
            false
        }
        Command::Refresh { force } => {
            refresh(&mut collection, force).await;
            true
        }
        Command::Show { order, limit } => {
            let mode = OrderingMode::parse(&order)
                .with_context(|| format!("Unknown order '{}'", order))?;
            show(&collection, mode, limit);
            false
        }
        Command::Favorite { link } => {
            let entry = find_entry(&collection, &link)?;
            report(collection.add_favorite(entry), "Bookmarked", "Already bookmarked", &link)
        }
        Command::Unfavorite { link } => {
            let key = entry_key(&link)?;
            report(collection.remove_favorite(&key), "Removed bookmark", "Not bookmarked", &link)
        }
        Command::Hide { link } => {
            let entry = find_entry(&collection, &link)?;
            report(collection.add_to_blacklist(entry), "Hidden", "Already hidden", &link)
        }
        Command::Unhide { link } => {
            let key = entry_key(&link)?;
            report(collection.remove_from_blacklist(&key), "Unhidden", "Not hidden", &link)
        }
    };

    if changed {
        store::save(&state_path, &collection.snapshot())
            .with_context(|| format!("Failed to save state to {}", state_path.display()))?;
    }
    Ok(())
}

/// Creates the config directory with user-only permissions.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).context("Failed to create config directory")?;
        tracing::info!(path = %dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read config directory metadata");
            }
        }
    }
    Ok(())
}

async fn refresh(collection: &mut Collection, force: bool) {
    if collection.is_empty() {
        println!("No feeds. Add one with: feedloom add <url>");
        return;
    }

    let (sink, mut rx) = EventSink::channel();
    collection.set_event_sink(sink);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let results = collection.refresh(force).join().await;

    // Dropping the senders lets the printer drain and finish
    collection.set_event_sink(EventSink::default());
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Event printer task failed");
    }

    let mut failed = 0;
    for result in &results {
        match &result.result {
            Ok(summary) => println!(
                "{}: {} new, {} images",
                result.feed, summary.added, summary.images_loaded
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", result.feed, e);
            }
        }
    }
    println!(
        "Refreshed {} feeds ({} failed), {} entries total",
        results.len(),
        failed,
        collection.entries().len()
    );
}

fn print_event(event: &FeedEvent) {
    match &event.kind {
        FeedEventKind::DownloadFailure { error } => {
            eprintln!("warning: {}: download failed: {}", event.feed, error);
        }
        FeedEventKind::ParseError { message } => {
            eprintln!("warning: {}: {}", event.feed, message);
        }
        FeedEventKind::ValidationError { message } => {
            eprintln!("warning: {}: {}", event.feed, message);
        }
        FeedEventKind::InvalidFeed => {
            eprintln!("warning: {}: not an RSS feed", event.feed);
        }
        FeedEventKind::ImageDownloadFailed { target, entry } => {
            let what = match (target, entry) {
                (ImageTarget::Channel, _) => "channel image".to_string(),
                (_, Some(entry)) => format!("image for '{}'", clean_title(&entry.title)),
                (ImageTarget::Entry(i), None) => format!("image #{}", i),
            };
            tracing::debug!(feed = %event.feed, "{} failed", what);
        }
        kind => tracing::debug!(feed = %event.feed, event = ?kind, "Feed event"),
    }
}

fn list_feeds(collection: &Collection) {
    if collection.is_empty() {
        println!("No feeds.");
        return;
    }
    for (index, feed) in collection.feeds().iter().enumerate() {
        let title = feed.channel_title();
        let title = if title.is_empty() {
            "(never refreshed)".to_string()
        } else {
            clean_title(&title)
        };
        let updated = feed
            .last_updated()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "[{}] {}  {} entries, updated {}\n    {}",
            index,
            title,
            feed.len(),
            updated,
            feed.url()
        );
    }
}

fn show(collection: &Collection, mode: OrderingMode, limit: Option<usize>) {
    let sections = collection.view(mode);
    if sections.is_empty() {
        println!("Nothing to show.");
        return;
    }
    for section in sections {
        println!("== {} ==", clean_title(&section.title));
        let take = limit.unwrap_or(section.entries.len());
        for entry in section.entries.iter().take(take) {
            let marker = if collection.is_favorite(entry) { '*' } else { ' ' };
            println!(
                "{} {}  {}",
                marker,
                entry.pub_date(),
                clean_title(&entry.title)
            );
            if let Some(link) = entry.identity() {
                println!("    {}", link);
            }
        }
    }
}

fn clean_title(title: &str) -> String {
    truncate_to_width(&strip_control_chars(title), TITLE_WIDTH).into_owned()
}

fn find_entry(collection: &Collection, link: &str) -> Result<Arc<Entry>> {
    let url = Url::parse(link.trim()).context("Invalid entry link")?;
    collection
        .find_entry(url.as_str())
        .with_context(|| format!("No entry with link {}", url))
}

/// Entry carrying only a link, for identity comparisons.
fn entry_key(link: &str) -> Result<Entry> {
    let url = Url::parse(link.trim()).context("Invalid entry link")?;
    Ok(Entry {
        link: Some(url),
        ..Entry::default()
    })
}

fn report(changed: bool, done: &str, unchanged: &str, link: &str) -> bool {
    if changed {
        println!("{}: {}", done, link);
    } else {
        println!("{}: {}", unchanged, link);
    }
    changed
}
