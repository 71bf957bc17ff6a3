use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::dates::parse_pub_date;
use super::events::{ImageTarget, ParseObserver};
use super::fetcher::Fetcher;
use super::images::extract_image_url;
use crate::model::{read_channel, write_channel, Entry, SharedChannel};
use crate::util::{strip_tags, unescape_html};

/// Channel-level elements whose text is collected.
const CHANNEL_TAGS: &[&str] = &[
    "title",
    "description",
    "link",
    "image",
    "category",
    "lastBuildDate",
    "skipDays",
    "skipHours",
];

/// Item-level elements whose text is collected.
const ENTRY_TAGS: &[&str] = &["title", "link", "pubDate", "author", "description", "category"];

/// Errors that stop a parse. Entries committed before the error stay in
/// the channel.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// The XML is not well-formed.
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },
    /// The document ended while elements were still open.
    #[error("Document ended with {0} unclosed element(s)")]
    UnexpectedEof(usize),
    /// The document contains no elements at all.
    #[error("Document has no root element")]
    NoRootElement,
}

/// Result of consuming one document.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    /// Entries newly inserted into the channel (duplicates excluded).
    pub added: usize,
    /// Whether a `<channel>` element was seen at all.
    pub saw_channel: bool,
    /// Channel indices of newly added entries that carry an image URL, in
    /// document order.
    pub image_candidates: Vec<usize>,
}

/// How the image downloads of one parse went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSummary {
    pub loaded: usize,
    pub failed: usize,
}

/// Streaming RSS parser bound to a channel.
///
/// [`Parser::parse`] walks the document with `quick-xml`, committing each
/// entry to the channel as soon as its `</item>` is seen, so readers of
/// the channel watch it fill up. [`Parser::download_images`] then fetches
/// the images discovered along the way.
pub struct Parser {
    channel: SharedChannel,
    observer: Arc<dyn ParseObserver>,
    base_url: Option<Url>,
}

impl Parser {
    pub fn new(channel: SharedChannel, observer: Arc<dyn ParseObserver>) -> Self {
        Self {
            channel,
            observer,
            base_url: None,
        }
    }

    /// Resolves relative links and image URLs against `base`.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Consumes `bytes`, populating the channel.
    ///
    /// Reports `begin_parsing`, then `complete_parsing` on success or
    /// `parse_error` on failure. Unknown elements are ignored.
    pub fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome, ParseError> {
        self.observer.begin_parsing();

        let mut state = ParseState::new(self);
        match state.run(bytes) {
            Ok(()) => {
                tracing::debug!(
                    added = state.added,
                    images = state.image_candidates.len(),
                    "Parsed feed document"
                );
                self.observer.complete_parsing();
                Ok(ParseOutcome {
                    added: state.added,
                    saw_channel: state.saw_channel,
                    image_candidates: state.image_candidates,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, committed = state.added, "Feed document is malformed");
                self.observer.parse_error(&e);
                Err(e)
            }
        }
    }

    /// Fetches the channel image (if not loaded yet) and the image of every
    /// candidate entry, one task each.
    ///
    /// `begin_image_download` is reported for a target before its task is
    /// spawned, so it always precedes that target's success or failure.
    /// Completions of different targets arrive in any order. Returns once
    /// every task has finished.
    pub async fn download_images(
        &self,
        outcome: &ParseOutcome,
        fetcher: &Fetcher,
        cancel: &CancellationToken,
    ) -> ImageSummary {
        let mut tasks = JoinSet::new();
        let mut targets = HashMap::new();

        let channel_image = {
            let channel = read_channel(&self.channel);
            if channel.image.is_loaded() {
                None
            } else {
                channel.image_url.clone()
            }
        };
        if let Some(url) = channel_image {
            self.observer.begin_image_download(ImageTarget::Channel);
            let channel = Arc::clone(&self.channel);
            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            let handle = tasks.spawn(async move {
                match fetcher.fetch_image(&url, &cancel).await {
                    Ok(bytes) => {
                        read_channel(&channel).image.set(bytes);
                        true
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Channel image download failed");
                        false
                    }
                }
            });
            targets.insert(handle.id(), ImageTarget::Channel);
        }

        for &index in &outcome.image_candidates {
            let target = ImageTarget::Entry(index);
            self.observer.begin_image_download(target);

            let entry = read_channel(&self.channel).get(index).cloned();
            let Some((entry, url)) =
                entry.and_then(|e| e.image_url.clone().map(|url| (e, url)))
            else {
                self.observer.image_download_failure(target);
                continue;
            };

            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            let handle = tasks.spawn(async move {
                match fetcher.fetch_image(&url, &cancel).await {
                    Ok(bytes) => {
                        entry.image.set(bytes);
                        true
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Entry image download failed");
                        false
                    }
                }
            });
            targets.insert(handle.id(), target);
        }

        self.finish_image_tasks(tasks, targets).await
    }

    /// Reports the completion of every image task. A task that panicked or
    /// was aborted counts as a failed download, so every begun target gets
    /// its completion.
    async fn finish_image_tasks(
        &self,
        mut tasks: JoinSet<bool>,
        mut targets: HashMap<task::Id, ImageTarget>,
    ) -> ImageSummary {
        let mut summary = ImageSummary::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, loaded) = match joined {
                Ok((id, loaded)) => (id, loaded),
                Err(e) => {
                    tracing::error!(error = %e, "Image download task failed");
                    (e.id(), false)
                }
            };
            let Some(target) = targets.remove(&id) else {
                continue;
            };
            if loaded {
                summary.loaded += 1;
                self.observer.image_download_success(target);
            } else {
                summary.failed += 1;
                self.observer.image_download_failure(target);
            }
        }
        summary
    }
}

enum Scope {
    Outside,
    InChannel,
    InItem(Entry),
}

/// Mutable state of one pass over a document.
struct ParseState<'p> {
    parser: &'p Parser,
    scope: Scope,
    parents: Vec<String>,
    text: String,
    saw_element: bool,
    saw_channel: bool,
    added: usize,
    image_candidates: Vec<usize>,
}

impl<'p> ParseState<'p> {
    fn new(parser: &'p Parser) -> Self {
        Self {
            parser,
            scope: Scope::Outside,
            parents: Vec::new(),
            text: String::new(),
            saw_element: false,
            saw_channel: false,
            added: 0,
            image_candidates: Vec::new(),
        }
    }

    fn run(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = element_name(&e);
                    let media_url = media_url(&name, &e, &reader);
                    self.start(name, media_url);
                }
                Ok(Event::Empty(e)) => {
                    let name = element_name(&e);
                    let media_url = media_url(&name, &e, &reader);
                    self.start(name.clone(), media_url);
                    self.end(&name);
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    self.end(&name);
                }
                Ok(Event::Text(e)) => {
                    self.characters(&decode_text(&e));
                }
                Ok(Event::CData(e)) => {
                    self.characters(&String::from_utf8_lossy(&e));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ParseError::Syntax {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    });
                }
                _ => {}
            }
            buf.clear();
        }

        if !self.parents.is_empty() {
            return Err(ParseError::UnexpectedEof(self.parents.len()));
        }
        if !self.saw_element {
            return Err(ParseError::NoRootElement);
        }
        Ok(())
    }

    fn start(&mut self, name: String, media_url: Option<String>) {
        self.saw_element = true;

        let parser = self.parser;
        match self.scope {
            Scope::Outside if name == "channel" => {
                self.scope = Scope::InChannel;
                self.saw_channel = true;
            }
            Scope::InChannel if name == "item" => {
                self.scope = Scope::InItem(Entry::default());
            }
            Scope::InItem(_) if name == "item" => {
                parser
                    .observer
                    .validation_error("<item> nested inside another <item>");
            }
            Scope::InItem(ref mut entry) => {
                if entry.image_url.is_none() {
                    entry.image_url = media_url.and_then(|u| resolve(parser, &u));
                }
            }
            _ => {}
        }

        self.parents.push(name);
    }

    fn characters(&mut self, text: &str) {
        let Some(current) = self.parents.last().map(String::as_str) else {
            return;
        };
        let parent = self.parent_of_current();

        let wanted = match self.scope {
            Scope::Outside => false,
            Scope::InChannel => {
                CHANNEL_TAGS.contains(&current)
                    || (current == "url" && parent == Some("image"))
                    || (current == "day" && parent == Some("skipDays"))
                    || (current == "hour" && parent == Some("skipHours"))
            }
            Scope::InItem(_) => ENTRY_TAGS.contains(&current),
        };
        if wanted {
            self.text.push_str(text);
        }
    }

    fn parent_of_current(&self) -> Option<&str> {
        let len = self.parents.len();
        (len >= 2).then(|| self.parents[len - 2].as_str())
    }

    fn end(&mut self, name: &str) {
        if self.parents.last().map(String::as_str) == Some(name) {
            self.parents.pop();
        }
        let parent = self.parents.last().cloned();
        let parent = parent.as_deref();
        let text = std::mem::take(&mut self.text);

        let parser = self.parser;
        match self.scope {
            Scope::InItem(_) if name == "item" => self.commit_entry(),
            Scope::InItem(ref mut entry) => {
                if parent == Some("item") {
                    apply_item_field(parser, entry, name, &text);
                }
            }
            Scope::InChannel if name == "channel" => self.scope = Scope::Outside,
            Scope::InChannel => self.apply_channel_field(name, parent, &text),
            Scope::Outside => {}
        }
    }

    fn commit_entry(&mut self) {
        let Scope::InItem(entry) = std::mem::replace(&mut self.scope, Scope::InChannel) else {
            return;
        };
        let entry = Arc::new(entry);
        let has_image = entry.image_url.is_some();

        let mut channel = write_channel(&self.parser.channel);
        if channel.add_entry(entry) {
            self.added += 1;
            if has_image {
                self.image_candidates.push(channel.len() - 1);
            }
        }
    }

    fn apply_channel_field(&self, name: &str, parent: Option<&str>, text: &str) {
        let value = clean_text(text);
        let grandparent = self.parent_of_current();
        let mut channel = write_channel(&self.parser.channel);

        match (parent, name) {
            (Some("channel"), "title") => channel.title = value,
            (Some("channel"), "description") => channel.description = value,
            (Some("channel"), "link") => channel.link = resolve(self.parser, &value),
            (Some("channel"), "category") if !value.is_empty() => channel.category = Some(value),
            (Some("channel"), "lastBuildDate") => channel.last_build = parse_pub_date(&value),
            (Some("image"), "url") if grandparent == Some("channel") => {
                channel.image_url = resolve(self.parser, &value);
            }
            (Some("skipDays"), "day") if !value.is_empty() => channel.skip_days.push(value),
            (Some("skipHours"), "hour") => {
                if let Ok(hour) = value.parse::<u8>() {
                    channel.skip_hours.push(hour);
                }
            }
            _ => {}
        }
    }
}

fn apply_item_field(parser: &Parser, entry: &mut Entry, name: &str, text: &str) {
    match name {
        "link" => entry.link = resolve(parser, text.trim()),
        "pubDate" => {
            entry.published = parse_pub_date(text);
            if entry.published.is_none() {
                tracing::debug!(pub_date = %text.trim(), "Unrecognized pubDate format");
            }
        }
        "title" => entry.title = clean_text(text),
        "author" => entry.author = clean_text(text),
        "category" => entry.category = clean_text(text),
        "description" => {
            if let Some(url) = extract_image_url(text).and_then(|u| resolve(parser, u)) {
                entry.image_url = Some(url);
            }
            entry.description = unescape_html(&strip_tags(text)).trim().to_string();
        }
        _ => {}
    }
}

/// Resolves XML and HTML5 entities in a text node. Text that quick-xml
/// rejects (a bare `&`, an unknown entity) is decoded leniently instead.
fn decode_text(e: &BytesText<'_>) -> String {
    match e.unescape_with(resolve_html5_entity) {
        Ok(text) => text.into_owned(),
        Err(err) => {
            let raw = String::from_utf8_lossy(e);
            tracing::trace!(error = %err, "Decoding text leniently");
            unescape_html(&raw).into_owned()
        }
    }
}

/// Second decoding pass for text fields: feeds routinely escape HTML
/// entities on top of the XML escaping.
fn clean_text(text: &str) -> String {
    unescape_html(text.trim()).trim().to_string()
}

fn resolve(parser: &Parser, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match &parser.base_url {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    };
    match parsed {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!(url = %raw, error = %e, "Ignoring unparseable URL");
            None
        }
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// `url` attribute of a `<media:thumbnail>` / `<media:content>` element.
fn media_url(name: &str, e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    if name != "media:thumbnail" && name != "media:content" {
        return None;
    }
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"url")
        .and_then(|attr| attr.decode_and_unescape_value(reader.decoder()).ok())
        .map(|value| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Channel;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Begin,
        Complete,
        ImageBegin(ImageTarget),
        ImageOk(ImageTarget),
        ImageFailed(ImageTarget),
        Error,
        Invalid(String),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Seen>>);

    impl Recorder {
        fn seen(&self) -> Vec<Seen> {
            self.0.lock().unwrap().clone()
        }
        fn push(&self, s: Seen) {
            self.0.lock().unwrap().push(s);
        }
    }

    impl ParseObserver for Recorder {
        fn begin_parsing(&self) {
            self.push(Seen::Begin);
        }
        fn complete_parsing(&self) {
            self.push(Seen::Complete);
        }
        fn begin_image_download(&self, target: ImageTarget) {
            self.push(Seen::ImageBegin(target));
        }
        fn image_download_success(&self, target: ImageTarget) {
            self.push(Seen::ImageOk(target));
        }
        fn image_download_failure(&self, target: ImageTarget) {
            self.push(Seen::ImageFailed(target));
        }
        fn parse_error(&self, _error: &ParseError) {
            self.push(Seen::Error);
        }
        fn validation_error(&self, message: &str) {
            self.push(Seen::Invalid(message.to_string()));
        }
    }

    fn parse(doc: &str) -> (SharedChannel, Arc<Recorder>, Result<ParseOutcome, ParseError>) {
        let channel = Channel::new().into_shared();
        let recorder = Arc::new(Recorder::default());
        let parser = Parser::new(channel.clone(), recorder.clone());
        let result = parser.parse(doc.as_bytes());
        (channel, recorder, result)
    }

    fn entries(channel: &SharedChannel) -> Vec<Arc<Entry>> {
        read_channel(channel).entries().to_vec()
    }

    const TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example</title>
  <item><title>First</title><link>http://x/1</link></item>
  <item><title>Second</title><link>http://x/2</link></item>
</channel></rss>"#;

    #[test]
    fn test_minimal_document() {
        let doc = "<channel><item><title>A</title><link>http://x/1</link><pubDate>Mon, 02 Jan 2006 15:04:05 GMT</pubDate></item></channel>";
        let (channel, recorder, result) = parse(doc);

        let outcome = result.unwrap();
        assert_eq!(outcome.added, 1);
        let entries = entries(&channel);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "A");
        assert_eq!(entries[0].identity(), Some("http://x/1"));
        assert_eq!(entries[0].pub_date(), "2006-01-02 15:04:05");
        assert_eq!(recorder.seen(), vec![Seen::Begin, Seen::Complete]);
    }

    #[test]
    fn test_item_fields_and_entities() {
        let doc = r#"<rss><channel><item>
            <title>Tom &amp;amp; Jerry &amp;lt;Show&amp;gt;</title>
            <author> jane@example.com </author>
            <category>News</category>
            <pubDate>not a date</pubDate>
            <description>&lt;p&gt;Hello &amp;amp; welcome&lt;/p&gt;</description>
            <guid>ignored</guid>
        </item></channel></rss>"#;
        let (channel, _, result) = parse(doc);
        result.unwrap();

        let entries = entries(&channel);
        let e = &entries[0];
        assert_eq!(e.title, "Tom & Jerry <Show>");
        assert_eq!(e.author, "jane@example.com");
        assert_eq!(e.category, "News");
        assert_eq!(e.description, "Hello & welcome");
        assert!(e.link.is_none());
        assert_eq!(e.pub_date(), "Unknown");
    }

    #[test]
    fn test_description_thumbnail_extracted_and_removed() {
        let doc = r#"<rss><channel><item>
            <link>http://x/1</link>
            <description>&lt;media:thumbnail url="http://img/1.png"/&gt;Story text</description>
        </item></channel></rss>"#;
        let (channel, _, result) = parse(doc);
        let outcome = result.unwrap();

        let entries = entries(&channel);
        assert_eq!(
            entries[0].image_url.as_ref().map(Url::as_str),
            Some("http://img/1.png")
        );
        assert_eq!(entries[0].description, "Story text");
        assert_eq!(outcome.image_candidates, vec![0]);
    }

    #[test]
    fn test_cdata_description() {
        let doc = r#"<rss><channel><item>
            <link>http://x/1</link>
            <description><![CDATA[<img src="http://img/2.jpg"> Caf&eacute; <b>bold</b>]]></description>
        </item></channel></rss>"#;
        let (channel, _, result) = parse(doc);
        result.unwrap();

        let entries = entries(&channel);
        assert_eq!(
            entries[0].image_url.as_ref().map(Url::as_str),
            Some("http://img/2.jpg")
        );
        assert_eq!(entries[0].description, "Caf\u{e9} bold");
    }

    #[test]
    fn test_html_entities_in_xml_text() {
        let doc = r#"<rss><channel><title>Caf&eacute; &amp; Bar</title><item>
            <link>http://x/1</link>
            <title>&Uuml;ber &frac12; &hearts;</title>
            <author>AT&T &bogus; desk</author>
        </item></channel></rss>"#;
        let (channel, _, result) = parse(doc);
        result.unwrap();

        let channel = read_channel(&channel);
        assert_eq!(channel.title, "Caf\u{e9} & Bar");
        assert_eq!(channel.entries()[0].title, "\u{dc}ber \u{bd} \u{2665}");
        // Not well-formed, so decoded leniently with the oddities kept
        assert_eq!(channel.entries()[0].author, "AT&T &bogus; desk");
    }

    #[test]
    fn test_media_element_used_when_description_has_no_image() {
        let doc = r#"<rss xmlns:media="http://search.yahoo.com/mrss/"><channel><item>
            <link>http://x/1</link>
            <media:content url="http://img/3.jpg" medium="image"/>
            <description>plain</description>
        </item></channel></rss>"#;
        let (channel, _, result) = parse(doc);
        result.unwrap();
        assert_eq!(
            entries(&channel)[0].image_url.as_ref().map(Url::as_str),
            Some("http://img/3.jpg")
        );
    }

    #[test]
    fn test_channel_metadata_not_clobbered_by_image_or_items() {
        let doc = r#"<rss><channel>
            <title>Channel Title</title>
            <link>http://example.com/</link>
            <description>About</description>
            <lastBuildDate>Mon, 02 Jan 2006 15:04:05 GMT</lastBuildDate>
            <image><url>http://example.com/logo.png</url><title>Logo Title</title><link>http://elsewhere/</link></image>
            <skipDays><day>Saturday</day><day>Sunday</day></skipDays>
            <skipHours><hour>0</hour><hour>23</hour></skipHours>
            <item><title>Item Title</title><link>http://x/1</link></item>
        </channel></rss>"#;
        let (channel, _, result) = parse(doc);
        result.unwrap();

        let channel = read_channel(&channel);
        assert_eq!(channel.title, "Channel Title");
        assert_eq!(channel.description, "About");
        assert_eq!(channel.link.as_ref().map(Url::as_str), Some("http://example.com/"));
        assert_eq!(
            channel.image_url.as_ref().map(Url::as_str),
            Some("http://example.com/logo.png")
        );
        assert!(channel.last_build.is_some());
        assert_eq!(channel.skip_days, vec!["Saturday", "Sunday"]);
        assert_eq!(channel.skip_hours, vec![0, 23]);
        assert_eq!(channel.entries()[0].title, "Item Title");
    }

    #[test]
    fn test_duplicates_not_added_or_image_candidates() {
        let doc = r#"<rss><channel>
            <item><link>http://x/1</link><description>&lt;img src="http://img/a.png"&gt;</description></item>
            <item><link>http://x/1</link><description>&lt;img src="http://img/b.png"&gt;</description></item>
        </channel></rss>"#;
        let (channel, _, result) = parse(doc);
        let outcome = result.unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.image_candidates, vec![0]);
        assert_eq!(entries(&channel).len(), 1);
    }

    #[test]
    fn test_reparse_into_same_channel_adds_nothing() {
        let channel = Channel::new().into_shared();
        let parser = Parser::new(channel.clone(), Arc::new(crate::feed::NoopObserver));
        assert_eq!(parser.parse(TWO_ITEMS.as_bytes()).unwrap().added, 2);
        assert_eq!(parser.parse(TWO_ITEMS.as_bytes()).unwrap().added, 0);
        assert_eq!(entries(&channel).len(), 2);
    }

    #[test]
    fn test_truncated_document_keeps_committed_entry() {
        let cut = TWO_ITEMS.find("</item>").unwrap() + "</item>".len();
        let (channel, recorder, result) = parse(&TWO_ITEMS[..cut]);

        assert!(matches!(result, Err(ParseError::UnexpectedEof(_))));
        let entries = entries(&channel);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "First");
        assert_eq!(recorder.seen(), vec![Seen::Begin, Seen::Error]);
    }

    #[test]
    fn test_mismatched_tags_are_syntax_errors() {
        let doc = "<rss><channel><item><title>A</item></channel></rss>";
        let (channel, recorder, result) = parse(doc);
        assert!(matches!(result, Err(ParseError::Syntax { .. })));
        assert!(entries(&channel).is_empty());
        assert!(recorder.seen().contains(&Seen::Error));
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let (_, _, result) = parse("");
        assert!(matches!(result, Err(ParseError::NoRootElement)));
    }

    #[test]
    fn test_unrecognized_shape_yields_nothing() {
        let doc = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><title>A</title></entry></feed>"#;
        let (channel, recorder, result) = parse(doc);
        let outcome = result.unwrap();
        assert!(!outcome.saw_channel);
        assert_eq!(outcome.added, 0);
        assert!(entries(&channel).is_empty());
        assert_eq!(recorder.seen(), vec![Seen::Begin, Seen::Complete]);
    }

    #[test]
    fn test_nested_item_reported_as_validation_error() {
        let doc = "<rss><channel><item><link>http://x/1</link><item></item></item></channel></rss>";
        let (_, recorder, result) = parse(doc);
        result.unwrap();
        assert!(recorder
            .seen()
            .iter()
            .any(|s| matches!(s, Seen::Invalid(_))));
    }

    #[test]
    fn test_relative_links_resolved_against_base() {
        let channel = Channel::new().into_shared();
        let parser = Parser::new(channel.clone(), Arc::new(crate::feed::NoopObserver))
            .with_base_url(Url::parse("http://example.com/blog/feed.xml").unwrap());
        parser
            .parse(b"<rss><channel><item><link>/posts/1</link></item></channel></rss>")
            .unwrap();
        assert_eq!(
            entries(&channel)[0].identity(),
            Some("http://example.com/posts/1")
        );
    }

    #[tokio::test]
    async fn test_download_images_reports_each_target() {
        use wiremock::matchers::path;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(path("/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
        Mock::given(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let doc = format!(
            r#"<rss><channel>
                <image><url>{0}/ok.png</url></image>
                <item><link>http://x/1</link><description>&lt;img src="{0}/ok.png"&gt;</description></item>
                <item><link>http://x/2</link></item>
                <item><link>http://x/3</link><description>&lt;img src="{0}/missing.png"&gt;</description></item>
            </channel></rss>"#,
            server.uri()
        );

        let channel = Channel::new().into_shared();
        let recorder = Arc::new(Recorder::default());
        let parser = Parser::new(channel.clone(), recorder.clone());
        let outcome = parser.parse(doc.as_bytes()).unwrap();
        assert_eq!(outcome.image_candidates, vec![0, 2]);

        let fetcher = Fetcher::new(reqwest::Client::new());
        let summary = parser
            .download_images(&outcome, &fetcher, &CancellationToken::new())
            .await;
        assert_eq!(summary, ImageSummary { loaded: 2, failed: 1 });

        let seen = recorder.seen();
        let position = |s: &Seen| seen.iter().position(|x| x == s).unwrap();
        let complete = position(&Seen::Complete);
        for target in [ImageTarget::Channel, ImageTarget::Entry(0), ImageTarget::Entry(2)] {
            let begin = position(&Seen::ImageBegin(target));
            assert!(complete < begin);
            let end = seen
                .iter()
                .position(|x| *x == Seen::ImageOk(target) || *x == Seen::ImageFailed(target))
                .unwrap();
            assert!(begin < end);
        }
        assert!(seen.contains(&Seen::ImageFailed(ImageTarget::Entry(2))));

        let channel = read_channel(&channel);
        assert_eq!(channel.image.get(), Some(&[1u8, 2, 3][..]));
        assert_eq!(channel.entries()[0].image_bytes(), Some(&[1u8, 2, 3][..]));
        assert!(channel.entries()[2].image_bytes().is_none());
    }

    fn explode() -> bool {
        panic!("image decoder exploded")
    }

    #[tokio::test]
    async fn test_failed_image_task_still_reports_completion() {
        let recorder = Arc::new(Recorder::default());
        let parser = Parser::new(Channel::new().into_shared(), recorder.clone());

        let mut tasks = JoinSet::new();
        let mut targets = HashMap::new();
        targets.insert(tasks.spawn(async { true }).id(), ImageTarget::Entry(0));
        targets.insert(tasks.spawn(async { explode() }).id(), ImageTarget::Entry(1));

        let summary = parser.finish_image_tasks(tasks, targets).await;
        assert_eq!(summary, ImageSummary { loaded: 1, failed: 1 });

        let seen = recorder.seen();
        assert!(seen.contains(&Seen::ImageOk(ImageTarget::Entry(0))));
        assert!(seen.contains(&Seen::ImageFailed(ImageTarget::Entry(1))));
    }
}
