/// Image-bearing tags looked for in item descriptions, in priority order,
/// each paired with the attribute holding the URL.
const IMAGE_TAGS: &[(&str, &str)] = &[
    ("<media:thumbnail", "url="),
    ("<media:content", "url="),
    ("<img", "src="),
];

/// Finds an image URL embedded in description markup.
///
/// The first tag kind from [`IMAGE_TAGS`] that occurs anywhere in the text
/// wins, even if a lower-priority tag appears earlier. Only the first
/// occurrence of that tag is inspected: its URL attribute must sit inside
/// the tag and be quoted with `"` or `'`. Returns `None` when the chosen
/// tag has no usable attribute; lower-priority tags are not tried then.
pub fn extract_image_url(html: &str) -> Option<&str> {
    let lower = html.to_ascii_lowercase();
    let (tag, attribute) = IMAGE_TAGS.iter().find(|(tag, _)| lower.contains(tag))?;

    let tag_start = lower.find(tag)?;
    let tag_end = lower[tag_start..]
        .find('>')
        .map_or(html.len(), |end| tag_start + end);
    let tag_text = &lower[tag_start + tag.len()..tag_end];

    let attr_at = find_attribute(tag_text, attribute)?;
    let value_start = tag_start + tag.len() + attr_at + attribute.len();

    let quote = html[value_start..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value = &html[value_start + 1..tag_end];
    let value = &value[..value.find(quote)?];
    let value = value.trim();

    (!value.is_empty()).then_some(value)
}

/// Position of `attribute` in `tag_text` where it starts a new attribute
/// (so `src=` does not match inside `data-src=`).
fn find_attribute(tag_text: &str, attribute: &str) -> Option<usize> {
    tag_text.match_indices(attribute).map(|(at, _)| at).find(|&at| {
        at == 0
            || tag_text[..at]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace)
    })
}
