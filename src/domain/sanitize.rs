//! Display title to canonical identifier conversion.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Longest identifier produced by [`sanitize_title`].
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Identifier used when nothing usable survives sanitization.
pub const FALLBACK_IDENTIFIER: &str = "video";

/// Turn a free-form display title into a lowercase, URL and filesystem safe
/// identifier matching `^[a-z0-9_-]{1,100}$`.
pub fn sanitize_title(title: &str) -> String {
    let mut identifier: String = title
        .to_lowercase()
        .replace(' ', "_")
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
        .take(MAX_IDENTIFIER_LEN)
        .collect();

    let trimmed_len = identifier.trim_end_matches(['-', '_']).len();
    identifier.truncate(trimmed_len);

    if identifier.is_empty() {
        return FALLBACK_IDENTIFIER.to_string();
    }
    identifier
}

/// True when `value` is already a canonical identifier.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'))
}
