use chrono::{DateTime, Utc};

/// Zone abbreviations replaced by numeric offsets before parsing.
///
/// `%z` only understands numeric offsets, and feeds in the wild use
/// these names far more than RFC 822 ever allowed.
const ZONE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("GMT", "+0000"),
    ("UT", "+0000"),
    ("UTC", "+0000"),
    ("Z", "+0000"),
    ("EDT", "-0400"),
    ("EST", "-0500"),
    ("CDT", "-0500"),
    ("CST", "-0600"),
    ("MDT", "-0600"),
    ("MST", "-0700"),
    ("PDT", "-0700"),
    ("PST", "-0800"),
    ("BST", "+0100"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
    ("IST", "+0530"),
    ("JST", "+0900"),
    ("AEST", "+1000"),
];

const FOUR_DIGIT_YEAR_FORMATS: &[&str] = &["%d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M %z"];
const TWO_DIGIT_YEAR_FORMATS: &[&str] = &["%d %b %y %H:%M:%S %z", "%d %b %y %H:%M %z"];

/// Parses an RSS `pubDate` (or `lastBuildDate`).
///
/// Strict RFC 2822 comes first, then RFC 3339. Dates both reject fall back
/// to a looser RFC 822 reading: optional day-of-week (ignored rather than
/// checked), two or four digit years, optional seconds, and either a
/// numeric offset or one of [`ZONE_ABBREVIATIONS`]. Returns `None` when
/// nothing matches.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(date.with_timezone(&Utc));
    }

    let without_weekday = match trimmed.split_once(',') {
        Some((_, rest)) => rest.trim(),
        None => trimmed,
    };
    let normalized = replace_zone_abbreviation(without_weekday);

    let year_len = normalized
        .split_whitespace()
        .nth(2)
        .map(str::len)
        .unwrap_or_default();
    let formats = if year_len == 2 {
        TWO_DIGIT_YEAR_FORMATS
    } else {
        FOUR_DIGIT_YEAR_FORMATS
    };

    formats
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
        .map(|date| date.with_timezone(&Utc))
}

fn replace_zone_abbreviation(s: &str) -> String {
    let Some((head, zone)) = s.rsplit_once(char::is_whitespace) else {
        return s.to_string();
    };

    match ZONE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(zone))
    {
        Some((_, offset)) => format!("{} {}", head.trim_end(), offset),
        None => s.to_string(),
    }
}
