//! Next-chapter URL derivation from the `chapter-<n>` token in the URL path.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static CHAPTER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/chapter-(\d+)").expect("chapter token regex is valid") // Static pattern, safe to panic
});

/// Byte range of the path component: after `scheme://authority`, before `?` or `#`.
fn path_range(url: &str) -> Range<usize> {
    let start = match url.find("://") {
        Some(scheme_end) => {
            let authority = scheme_end + 3;
            url[authority..]
                .find(['/', '?', '#'])
                .map(|i| authority + i)
                .unwrap_or(url.len())
        }
        None => 0,
    };
    let end = url[start..]
        .find(['?', '#'])
        .map(|i| start + i)
        .unwrap_or(url.len());
    start..end
}

/// Locate the first chapter index in the path: (digit span, parsed value).
fn locate_index(url: &str) -> Option<(Range<usize>, u64)> {
    let path = path_range(url);
    let caps = CHAPTER_TOKEN.captures(&url[path.clone()])?;
    let digits = caps.get(1)?;
    let value = digits.as_str().parse::<u64>().ok()?;
    Some((path.start + digits.start()..path.start + digits.end(), value))
}

/// Chapter index embedded in `url`, if any.
pub fn chapter_index(url: &str) -> Option<u64> {
    locate_index(url).map(|(_, n)| n)
}

/// Derive the next chapter URL by incrementing the path's `chapter-<n>` index.
///
/// Host, query string, fragment and the rest of the path are left untouched. Returns `None`
/// when the token is absent or the index would overflow.
pub fn next_chapter_url(url: &str) -> Option<String> {
    let (span, current) = locate_index(url)?;
    let next = current.checked_add(1)?;
    let mut out = String::with_capacity(url.len() + 1);
    out.push_str(&url[..span.start]);
    out.push_str(&next.to_string());
    out.push_str(&url[span.end..]);
    Some(out)
}
