use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

/// Decodes HTML character entities.
///
/// Handles every named HTML5 entity plus decimal (`&#38;`) and hexadecimal
/// (`&#x26;`) character references, one level per call. Anything that does
/// not decode (unknown names, a bare `&`) is copied through untouched.
///
/// # Examples
///
/// ```
/// use feedloom::util::unescape_html;
///
/// assert_eq!(unescape_html("Tom &amp; Jerry &lt;Show&gt;"), "Tom & Jerry <Show>");
/// assert_eq!(unescape_html("caf&#233; &#x263A;"), "café ☺");
/// assert_eq!(unescape_html("AT&T"), "AT&T");
/// ```
pub fn unescape_html(s: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(s)
}

/// Removes markup tags, keeping the text between them.
///
/// A tag is a `<` followed by at least one character other than `>` and
/// closed by `>`. An unterminated `<` (or `<>`) is kept as literal text, so
/// prose such as `a < b` survives. Line-break style tags (`<br>`, `<p>`,
/// `</p>`, `<div>`) become a single space so words do not run together.
/// The result is trimmed.
///
/// This is best-effort detagging for display, not sanitization.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('>') {
            Some(close) if close > 0 => {
                if is_block_tag(&after[..close]) && !out.ends_with(' ') {
                    out.push(' ');
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    out.trim().to_string()
}

fn is_block_tag(tag: &str) -> bool {
    let name = tag
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("");
    matches!(
        name.to_ascii_lowercase().as_str(),
        "br" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

/// Strips terminal control characters and ANSI escape sequences.
///
/// Feed text is attacker-controlled and ends up printed to a terminal by the
/// CLI, so escape sequences (CSI `ESC [ ... final`, OSC `ESC ] ... BEL|ST`)
/// and C0 controls other than tab, newline and carriage return are dropped.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s.chars().any(is_unsafe_control);
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if is_unsafe_control(c) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

fn is_unsafe_control(c: char) -> bool {
    c == '\x1b' || c == '\x7f' || (c < '\x20' && !matches!(c, '\t' | '\n' | '\r'))
}

/// Truncates a string to fit in `max_width` terminal columns.
///
/// Wide characters (CJK, most emoji) count as two columns. When the string
/// does not fit, it is cut and `...` appended so the result, ellipsis
/// included, is at most `max_width` columns. Widths too narrow for an
/// ellipsis get a plain cut.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    const ELLIPSIS: &str = "...";

    let widths: Vec<(usize, usize)> = s
        .char_indices()
        .map(|(idx, c)| (idx, UnicodeWidthChar::width(c).unwrap_or(0)))
        .collect();
    let total: usize = widths.iter().map(|(_, w)| w).sum();
    if total <= max_width {
        return Cow::Borrowed(s);
    }

    let budget = if max_width > ELLIPSIS.len() {
        max_width - ELLIPSIS.len()
    } else {
        max_width
    };

    let mut used = 0;
    let mut cut = 0;
    for (idx, w) in widths {
        if used + w > budget {
            cut = idx;
            break;
        }
        used += w;
    }

    if max_width > ELLIPSIS.len() {
        Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS))
    } else {
        Cow::Owned(s[..cut].to_string())
    }
}
