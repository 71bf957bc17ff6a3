use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

/// Sortable rendering used for publish dates.
pub const PUB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rendering of a publish date that could not be parsed.
pub const UNKNOWN_PUB_DATE: &str = "Unknown";

/// Downloaded image bytes, attached at most once after the owner is shared.
///
/// Image fetches complete after the entry (or channel) has already been
/// handed out as an `Arc`, so the bytes live in a set-once cell instead of
/// behind a lock.
#[derive(Default)]
pub struct ImageData(OnceLock<Vec<u8>>);

impl ImageData {
    pub fn new(bytes: Option<Vec<u8>>) -> Self {
        let cell = OnceLock::new();
        if let Some(bytes) = bytes {
            let _ = cell.set(bytes);
        }
        Self(cell)
    }

    pub fn get(&self) -> Option<&[u8]> {
        self.0.get().map(Vec::as_slice)
    }

    /// Stores the bytes. Returns `false` if bytes were already present.
    pub fn set(&self, bytes: Vec<u8>) -> bool {
        self.0.set(bytes).is_ok()
    }

    pub fn is_loaded(&self) -> bool {
        self.0.get().is_some()
    }
}

impl Clone for ImageData {
    fn clone(&self) -> Self {
        Self::new(self.0.get().cloned())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(bytes) => write!(f, "ImageData({} bytes)", bytes.len()),
            None => f.write_str("ImageData(none)"),
        }
    }
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<Vec<u8>>::deserialize(deserializer).map(Self::new)
    }
}

/// One item of a feed.
///
/// Built field by field by the parser while the item element is open, then
/// frozen and shared as `Arc<Entry>` once the channel accepts it. Only the
/// image bytes are filled in afterwards.
///
/// # Identity
///
/// Entries compare equal iff both have a link and the links are the same
/// absolute URL. An entry without a link is equal to nothing, itself
/// included, which is why `Entry` implements `PartialEq` but not `Eq`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub link: Option<Url>,
    pub published: Option<DateTime<Utc>>,
    pub author: String,
    pub description: String,
    pub category: String,
    pub image_url: Option<Url>,
    #[serde(default)]
    pub image: ImageData,
}

impl Entry {
    /// Publish date as `YYYY-MM-DD HH:MM:SS` (UTC), or `"Unknown"`.
    pub fn pub_date(&self) -> String {
        match self.published {
            Some(date) => date.format(PUB_DATE_FORMAT).to_string(),
            None => UNKNOWN_PUB_DATE.to_string(),
        }
    }

    /// The link as an absolute string, the key used for identity.
    pub fn identity(&self) -> Option<&str> {
        self.link.as_ref().map(Url::as_str)
    }

    pub fn image_bytes(&self) -> Option<&[u8]> {
        self.image.get()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
