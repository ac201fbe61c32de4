use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::canonical::canonicalize;
use crate::db::NewArticle;
use crate::item::{RawFeedItem, RawLink};
use crate::media::extract_image;
use crate::tagger::TopicTagger;
use crate::text::{self, SUMMARY_MAX_LENGTH};

/// Turns raw feed items into article records ready for upsert.
pub struct ItemExtractor {
    tagger: TopicTagger,
}

impl ItemExtractor {
    pub fn new(tagger: TopicTagger) -> Self {
        Self { tagger }
    }

    /// Normalize one item. Returns `None` when the item has no title or no
    /// resolvable link; feeds routinely carry such entries.
    pub fn extract(
        &self,
        item: &RawFeedItem,
        publication_id: i64,
        now: DateTime<Utc>,
    ) -> Option<NewArticle> {
        let title = item.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let link = resolve_link(item)?;

        let url = canonicalize(link);

        let content = [
            item.content_encoded.as_deref(),
            item.content.as_deref(),
            item.content_snippet.as_deref(),
            item.summary.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|c| !c.trim().is_empty())
        .fold("", |best, candidate| {
            if candidate.len() > best.len() {
                candidate
            } else {
                best
            }
        });

        let summary = [item.summary.as_deref(), item.excerpt.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| text::summarize(content, SUMMARY_MAX_LENGTH));

        let author = [item.creator.as_deref(), item.author.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|a| !a.is_empty())
            .map(str::to_string);

        let word_count = text::word_count(content);
        let tags = self.tagger.tag(title, content, &summary);

        let guid = item
            .guid
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| url.clone());

        let published_date = item
            .pub_date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(now);

        Some(NewArticle {
            title: text::clean(title),
            content: text::clean(content),
            summary: text::clean(&summary),
            url,
            guid,
            author,
            published_date,
            publication_id,
            image_url: extract_image(item),
            word_count: word_count as i64,
            reading_time: text::reading_time(word_count) as i64,
            tags,
        })
    }
}

/// Origin link beats the primary link, which beats the first alternate.
fn resolve_link(item: &RawFeedItem) -> Option<&str> {
    item.orig_link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .or_else(|| item.link.as_ref().and_then(RawLink::href))
        .or_else(|| item.links.iter().find_map(RawLink::href))
}

/// Parse the date formats seen in the wild, RFC 2822 and RFC 3339 first.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%z", "%a, %d %b %Y %H:%M:%S %z"] {
        if let Ok(date) = DateTime::parse_from_str(value, format) {
            return Some(date.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(value, format) {
            return Some(date.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}
