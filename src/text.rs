use std::sync::LazyLock;

use regex::Regex;

/// Default maximum length of a derived summary, in characters.
pub const SUMMARY_MAX_LENGTH: usize = 300;

/// Average reading speed used to derive reading time.
pub const WORDS_PER_MINUTE: usize = 200;

const ELLIPSIS: &str = "...";

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Remove markup tags without touching whitespace.
pub fn strip_tags(text: &str) -> String {
    TAG_PATTERN.replace_all(text, "").into_owned()
}

/// Strip markup, collapse whitespace runs to single spaces and trim.
pub fn clean(text: &str) -> String {
    strip_tags(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn word_count(text: &str) -> usize {
    strip_tags(text).split_whitespace().count()
}

/// Minutes needed to read `word_count` words, rounded up.
pub fn reading_time(word_count: usize) -> u32 {
    word_count.div_ceil(WORDS_PER_MINUTE) as u32
}

/// Derive a summary of at most `max_length` characters from `content`.
///
/// Content that fits is returned with its markup stripped. Longer content is cut
/// at `max_length` and backed up to the last full stop, provided that stop lies
/// past the halfway mark; otherwise the cut is hard and `...` is appended.
pub fn summarize(content: &str, max_length: usize) -> String {
    let stripped = strip_tags(content);

    if stripped.chars().count() <= max_length {
        return stripped;
    }

    let truncated: String = stripped.chars().take(max_length).collect();

    if let Some(byte_idx) = truncated.rfind('.') {
        let char_idx = truncated[..byte_idx].chars().count();
        if char_idx * 2 > max_length {
            return truncated[..=byte_idx].to_string();
        }
    }

    format!("{}{}", truncated, ELLIPSIS)
}
