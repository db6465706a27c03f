//! Build marker: a `<meta>` tag tying served HTML to the tenant it was built for.
//!
//! A page built for `acme-1234` carries
//! `<meta name="rewebz-build-marker" content="rwz-live-v2:acme-1234">`.
//! Seeing it in a response proves the edge served this tenant's content and
//! not a cached or foreign page.

use std::sync::LazyLock;

use regex::Regex;

pub const MARKER_NAME: &str = "rewebz-build-marker";
pub const MARKER_PREFIX: &str = "rwz-live-v2";

/// Any existing marker tag, whatever slug it names.
static ANY_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)<meta[^>]*name=["']{}["'][^>]*>\s*"#,
        regex::escape(MARKER_NAME)
    ))
    .expect("static marker pattern")
});

static HEAD_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("static head pattern"));
static HEAD_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</head\s*>").expect("static head pattern"));
static HTML_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html(?:\s[^>]*)?>").expect("static html pattern"));

/// Marker content for `slug`.
pub fn marker_content(slug: &str) -> String {
    format!("{MARKER_PREFIX}:{slug}")
}

pub fn marker_tag(slug: &str) -> String {
    format!(
        r#"<meta name="{MARKER_NAME}" content="{}">"#,
        marker_content(slug)
    )
}

/// True if `html` carries the marker for `slug`.
///
/// Matching is case-insensitive and tolerates extra attributes between
/// `name` and `content`. The content value must contain the marker as a
/// whole token, so `acme-1` does not match a page built for `acme-1234`.
pub fn has_marker(html: &str, slug: &str) -> bool {
    let token = format!(
        r#"(?:[^"']*[^a-z0-9"'-])?{}(?:[^a-z0-9"'-][^"']*)?"#,
        regex::escape(&marker_content(slug)),
    );
    let pattern = format!(
        r#"(?i)<meta[^>]*name=["']{}["'][^>]*content=["']{token}["'][^>]*>"#,
        regex::escape(MARKER_NAME),
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(html),
        Err(e) => {
            tracing::warn!(slug, error = %e, "Could not build marker pattern");
            false
        }
    }
}

/// Insert the marker for `slug`, replacing any stale one.
///
/// Placement: right after `<head>`, else before `</head>`, else right after
/// `<html>`, else at the very front.
pub fn inject_marker(html: &str, slug: &str) -> String {
    let cleaned = ANY_MARKER_RE.replace_all(html, "");
    let tag = marker_tag(slug);

    if let Some(m) = HEAD_OPEN_RE.find(&cleaned) {
        return splice(&cleaned, m.end(), &format!("\n{tag}"));
    }
    if let Some(m) = HEAD_CLOSE_RE.find(&cleaned) {
        return splice(&cleaned, m.start(), &format!("{tag}\n"));
    }
    if let Some(m) = HTML_OPEN_RE.find(&cleaned) {
        return splice(&cleaned, m.end(), &format!("\n<head>{tag}</head>"));
    }
    format!("{tag}\n{cleaned}")
}

fn splice(s: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(s.len() + insert.len());
    out.push_str(&s[..at]);
    out.push_str(insert);
    out.push_str(&s[at..]);
    out
}
