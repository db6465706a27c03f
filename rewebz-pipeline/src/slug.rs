//! Tenant slugs: DNS-label-safe identifiers derived from business names.
//!
//! Every slug matches `^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$`. A slug is
//! `<name-prefix>-<suffix>`, where the suffix comes from the request id so
//! two businesses with the same name still get distinct hostnames.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Maximum length of a DNS label.
pub const MAX_LABEL_LEN: usize = 63;

/// Used when the business name has nothing usable in it (e.g. all Hangul).
pub const FALLBACK_PREFIX: &str = "lead";

const SUFFIX_LEN: usize = 4;

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("static slug pattern")
});

/// True if `slug` is a valid single DNS label in canonical (lowercase) form.
pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_RE.is_match(slug)
}

/// Lowercase, strip diacritics, drop anything outside `[a-z0-9 -]`, and
/// fold whitespace/underscore runs into single hyphens.
fn sanitize(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c == '_' { ' ' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect();

    let mut out = String::with_capacity(folded.len());
    for c in folded.chars() {
        let c = if c.is_whitespace() { '-' } else { c };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

fn clamp(label: &str, max: usize) -> String {
    let cut: String = label.chars().take(max).collect();
    cut.trim_end_matches('-').to_string()
}

/// Short disambiguating suffix from a request id: its last four
/// alphanumerics, lowercased. Falls back to the current time in base36.
pub fn id_suffix(id: &str) -> String {
    let alnum: Vec<char> = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if alnum.is_empty() {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let t = to_base36(now);
        return t[t.len().saturating_sub(SUFFIX_LEN)..].to_string();
    }
    alnum[alnum.len().saturating_sub(SUFFIX_LEN)..].iter().collect()
}

pub(crate) fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Build a slug from a business name and a disambiguating suffix.
///
/// The output always satisfies [`is_valid_slug`].
pub fn normalize(business_name: &str, suffix: &str) -> String {
    let suffix = clamp(&sanitize(suffix).replace('-', ""), 16);
    let room = if suffix.is_empty() {
        MAX_LABEL_LEN
    } else {
        MAX_LABEL_LEN - suffix.len() - 1
    };

    let mut prefix = clamp(&sanitize(business_name), room);
    if prefix.is_empty() {
        prefix = FALLBACK_PREFIX.to_string();
    }

    let slug = if suffix.is_empty() {
        prefix
    } else {
        format!("{prefix}-{suffix}")
    };

    if is_valid_slug(&slug) {
        slug
    } else {
        FALLBACK_PREFIX.to_string()
    }
}

/// Result of re-checking a persisted slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugRepair {
    Valid(String),
    /// The stored value was invalid; `new` is its normalized form. The old
    /// DNS name must be removed before the new one is created.
    Repaired { old: String, new: String },
    /// Nothing salvageable; derive a fresh slug from the business name.
    Unrepairable { old: String },
}

pub fn repair(existing: &str) -> SlugRepair {
    let trimmed = existing.trim();
    if is_valid_slug(trimmed) {
        return SlugRepair::Valid(trimmed.to_string());
    }
    let candidate = clamp(&sanitize(trimmed), MAX_LABEL_LEN);
    if is_valid_slug(&candidate) {
        SlugRepair::Repaired {
            old: existing.to_string(),
            new: candidate,
        }
    } else {
        SlugRepair::Unrepairable {
            old: existing.to_string(),
        }
    }
}
