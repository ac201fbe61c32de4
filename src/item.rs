//! Raw feed items as they come off the wire, before normalization.
//!
//! Feeds disagree on the shape of almost every optional field: links are either a
//! plain string or an object carrying `href`, media fields show up as a list, a
//! single object or a bare string. The untagged enums here absorb those shapes,
//! and anything unrecognizable lands in an `Unrecognized` variant instead of
//! failing the whole item. Scalar text fields go through [`lenient_string`], so a
//! numeric guid or an object-valued title degrades the field, not the item.
//!
//! Items fetched over HTTP are built with [`RawFeedItem::from_entry`]; the serde
//! path is for callers handing over already-parsed JSON items.

use feed_rs::model::Entry;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawFeedItem {
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    pub link: Option<RawLink>,
    pub links: Vec<RawLink>,
    #[serde(rename = "feedburner:origLink", alias = "origLink")]
    #[serde(deserialize_with = "lenient_string")]
    pub orig_link: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub guid: Option<String>,
    #[serde(rename = "pubDate", alias = "isoDate", alias = "published")]
    #[serde(deserialize_with = "lenient_string")]
    pub pub_date: Option<String>,
    #[serde(rename = "content:encoded")]
    #[serde(deserialize_with = "lenient_string")]
    pub content_encoded: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(rename = "contentSnippet")]
    #[serde(deserialize_with = "lenient_string")]
    pub content_snippet: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub summary: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub excerpt: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub creator: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub author: Option<String>,
    pub enclosure: Option<Enclosure>,
    #[serde(rename = "media:content")]
    pub media_content: Option<MediaField>,
    #[serde(rename = "media:thumbnail")]
    pub media_thumbnail: Option<MediaField>,
    pub image: Option<MediaField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLink {
    Href(String),
    Object { href: Option<String> },
    Unrecognized(IgnoredAny),
}

impl RawLink {
    pub fn href(&self) -> Option<&str> {
        match self {
            RawLink::Href(href) => non_blank(href),
            RawLink::Object { href } => href.as_deref().and_then(non_blank),
            RawLink::Unrecognized(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnclosureRef {
    #[serde(deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Enclosure {
    Single(EnclosureRef),
    Text(String),
    Unrecognized(IgnoredAny),
}

impl Enclosure {
    /// URL of the enclosure when it is declared as an image.
    ///
    /// A bare string carries no type, so it never qualifies.
    pub fn image_url(&self) -> Option<&str> {
        let Enclosure::Single(enclosure) = self else {
            return None;
        };
        let is_image = enclosure
            .mime_type
            .as_deref()
            .is_some_and(|t| t.trim().to_ascii_lowercase().starts_with("image/"));
        if !is_image {
            return None;
        }
        enclosure.url.as_deref().and_then(non_blank)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseText {
    Text(String),
    Integer(i64),
    Float(f64),
    Named { name: String },
    Other(IgnoredAny),
}

/// Decode a text field that feeds sometimes send as a number or an object.
///
/// Numbers are stringified, `{ "name": ... }` objects yield the name, and any
/// other shape decodes as absent.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match LooseText::deserialize(deserializer)? {
        LooseText::Text(text) => Some(text),
        LooseText::Integer(n) => Some(n.to_string()),
        LooseText::Float(n) => Some(n.to_string()),
        LooseText::Named { name } => Some(name),
        LooseText::Other(_) => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MediaRef {
    #[serde(alias = "href")]
    pub url: Option<String>,
    #[serde(rename = "type", alias = "medium")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MediaField {
    List(Vec<MediaField>),
    Single(MediaRef),
    Text(String),
    Unrecognized(IgnoredAny),
}

impl MediaField {
    /// First usable URL carried by this field, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            MediaField::List(items) => items.iter().find_map(MediaField::url),
            MediaField::Single(media) => media.url.as_deref().and_then(non_blank),
            MediaField::Text(url) => non_blank(url),
            MediaField::Unrecognized(_) => None,
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn is_article_link(rel: Option<&str>) -> bool {
    match rel {
        None => true,
        Some(rel) => rel.eq_ignore_ascii_case("alternate"),
    }
}

impl RawFeedItem {
    /// Build a raw item from a parsed feed-rs entry.
    ///
    /// feed-rs folds RSS enclosures and Media RSS elements into `entry.media`;
    /// image-typed media content is surfaced as the enclosure, the rest as
    /// `media:content`. `orig_link` comes from the raw XML scan since feed-rs
    /// drops the feedburner extension.
    pub fn from_entry(entry: &Entry, orig_link: Option<String>) -> Self {
        let article_links: Vec<RawLink> = entry
            .links
            .iter()
            .filter(|l| is_article_link(l.rel.as_deref()))
            .map(|l| RawLink::Href(l.href.clone()))
            .collect();

        let media_contents: Vec<(String, Option<String>)> = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|c| {
                c.url
                    .as_ref()
                    .map(|u| (u.to_string(), c.content_type.as_ref().map(|t| t.to_string())))
            })
            .collect();

        let enclosure = media_contents
            .iter()
            .find(|(_, kind)| kind.as_deref().is_some_and(|k| k.starts_with("image/")))
            .map(|(url, kind)| {
                Enclosure::Single(EnclosureRef {
                    url: Some(url.clone()),
                    mime_type: kind.clone(),
                })
            });

        let media_content = if media_contents.is_empty() {
            None
        } else {
            Some(MediaField::List(
                media_contents
                    .into_iter()
                    .map(|(url, kind)| {
                        MediaField::Single(MediaRef {
                            url: Some(url),
                            kind,
                        })
                    })
                    .collect(),
            ))
        };

        let thumbnails: Vec<MediaField> = entry
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .map(|t| MediaField::Text(t.image.uri.clone()))
            .collect();
        let media_thumbnail = if thumbnails.is_empty() {
            None
        } else {
            Some(MediaField::List(thumbnails))
        };

        let guid = if entry.id.trim().is_empty() {
            None
        } else {
            Some(entry.id.clone())
        };

        Self {
            title: entry.title.as_ref().map(|t| t.content.clone()),
            link: article_links.first().cloned(),
            links: article_links,
            orig_link,
            guid,
            pub_date: entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()),
            content_encoded: entry.content.as_ref().and_then(|c| c.body.clone()),
            content: None,
            content_snippet: None,
            summary: entry.summary.as_ref().map(|s| s.content.clone()),
            excerpt: None,
            creator: None,
            author: entry.authors.first().map(|a| a.name.clone()),
            enclosure,
            media_content,
            media_thumbnail,
            image: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> RawFeedItem {
        serde_json::from_value(value).unwrap()
    }

    mod link_shape_tests {
        use super::*;

        #[test]
        fn test_string_link() {
            let item = decode(json!({ "link": "https://example.com/a" }));
            assert_eq!(item.link.unwrap().href(), Some("https://example.com/a"));
        }

        #[test]
        fn test_object_link() {
            let item = decode(json!({ "link": { "href": "https://example.com/b" } }));
            assert_eq!(item.link.unwrap().href(), Some("https://example.com/b"));
        }

        #[test]
        fn test_unrecognized_link_has_no_href() {
            let item = decode(json!({ "link": 42 }));
            assert_eq!(item.link.unwrap().href(), None);
        }

        #[test]
        fn test_blank_link_has_no_href() {
            let item = decode(json!({ "link": "   " }));
            assert_eq!(item.link.unwrap().href(), None);
        }
    }

    mod media_shape_tests {
        use super::*;

        #[test]
        fn test_media_list_skips_entries_without_url() {
            let item = decode(json!({
                "media:content": [ { "medium": "image" }, 7, { "url": "https://img/1.jpg" } ]
            }));
            assert_eq!(item.media_content.unwrap().url(), Some("https://img/1.jpg"));
        }

        #[test]
        fn test_media_object_and_string() {
            let item = decode(json!({
                "media:content": { "url": "https://img/obj.jpg" },
                "media:thumbnail": "https://img/thumb.jpg"
            }));
            assert_eq!(item.media_content.unwrap().url(), Some("https://img/obj.jpg"));
            assert_eq!(item.media_thumbnail.unwrap().url(), Some("https://img/thumb.jpg"));
        }

        #[test]
        fn test_media_garbage_degrades() {
            let item = decode(json!({ "media:content": true, "image": { "url": 5 } }));
            assert_eq!(item.media_content.unwrap().url(), None);
            assert_eq!(item.image.unwrap().url(), None);
        }

        #[test]
        fn test_field_aliases() {
            let item = decode(json!({
                "origLink": "https://origin.example.com/x",
                "isoDate": "2024-05-01T10:00:00Z",
                "content:encoded": "<p>body</p>",
                "contentSnippet": "body"
            }));
            assert_eq!(item.orig_link.as_deref(), Some("https://origin.example.com/x"));
            assert_eq!(item.pub_date.as_deref(), Some("2024-05-01T10:00:00Z"));
            assert_eq!(item.content_encoded.as_deref(), Some("<p>body</p>"));
            assert_eq!(item.content_snippet.as_deref(), Some("body"));
        }
    }

    mod scalar_shape_tests {
        use super::*;

        #[test]
        fn test_numeric_guid_and_title_are_stringified() {
            let item = decode(json!({
                "title": 2024,
                "guid": 987654321,
                "link": "https://example.com/n"
            }));
            assert_eq!(item.title.as_deref(), Some("2024"));
            assert_eq!(item.guid.as_deref(), Some("987654321"));
        }

        #[test]
        fn test_author_object_yields_name() {
            let item = decode(json!({ "author": { "name": "Jane Doe", "url": "https://jane" } }));
            assert_eq!(item.author.as_deref(), Some("Jane Doe"));
        }

        #[test]
        fn test_garbage_scalars_degrade_to_none() {
            let item = decode(json!({
                "title": { "type": "html" },
                "guid": [1, 2],
                "summary": null,
                "link": "https://example.com/kept"
            }));
            assert_eq!(item.title, None);
            assert_eq!(item.guid, None);
            assert_eq!(item.summary, None);
            assert_eq!(item.link.unwrap().href(), Some("https://example.com/kept"));
        }
    }

    mod enclosure_shape_tests {
        use super::*;

        #[test]
        fn test_string_enclosure_decodes_without_image() {
            let item = decode(json!({
                "title": "Episode",
                "enclosure": "https://cdn.example.com/pic.jpg"
            }));
            assert_eq!(item.title.as_deref(), Some("Episode"));
            assert!(matches!(item.enclosure, Some(Enclosure::Text(_))));
            assert_eq!(item.enclosure.as_ref().and_then(Enclosure::image_url), None);
        }

        #[test]
        fn test_garbage_enclosure_is_unrecognized() {
            let item = decode(json!({ "title": "Episode", "enclosure": [1, 2, 3] }));
            assert!(matches!(item.enclosure, Some(Enclosure::Unrecognized(_))));
            assert_eq!(item.title.as_deref(), Some("Episode"));
        }

        #[test]
        fn test_typed_enclosure_image_url() {
            let item = decode(json!({
                "enclosure": { "url": " https://cdn/e.png ", "type": "IMAGE/PNG", "length": 5 }
            }));
            assert_eq!(
                item.enclosure.as_ref().and_then(Enclosure::image_url),
                Some("https://cdn/e.png")
            );
        }
    }

    mod from_entry_tests {
        use super::*;

        fn parse_first(xml: &str) -> Entry {
            feed_rs::parser::parse(xml.as_bytes())
                .unwrap()
                .entries
                .into_iter()
                .next()
                .unwrap()
        }

        #[test]
        fn test_rss_item_fields() {
            let entry = parse_first(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
                    <channel>
                        <title>Feed</title>
                        <item>
                            <title>Hello</title>
                            <link>https://example.com/hello</link>
                            <guid>hello-1</guid>
                            <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                            <description>Short summary</description>
                            <content:encoded><![CDATA[<p>Full body</p>]]></content:encoded>
                            <enclosure url="https://example.com/pic.jpg" type="image/jpeg" length="100"/>
                        </item>
                    </channel>
                </rss>"#,
            );

            let item = RawFeedItem::from_entry(&entry, None);

            assert_eq!(item.title.as_deref(), Some("Hello"));
            assert_eq!(
                item.link.as_ref().and_then(RawLink::href),
                Some("https://example.com/hello")
            );
            assert_eq!(item.guid.as_deref(), Some("hello-1"));
            assert!(item.pub_date.is_some());
            assert_eq!(item.summary.as_deref(), Some("Short summary"));
            assert_eq!(item.content_encoded.as_deref(), Some("<p>Full body</p>"));
            assert_eq!(
                item.enclosure.as_ref().and_then(Enclosure::image_url),
                Some("https://example.com/pic.jpg")
            );
        }

        #[test]
        fn test_atom_entry_fields() {
            let entry = parse_first(
                r#"<?xml version="1.0" encoding="utf-8"?>
                <feed xmlns="http://www.w3.org/2005/Atom">
                    <title>Atom Feed</title>
                    <id>urn:feed</id>
                    <updated>2024-05-01T10:00:00Z</updated>
                    <entry>
                        <title>Atom Entry</title>
                        <id>urn:entry:1</id>
                        <updated>2024-05-01T10:00:00Z</updated>
                        <link rel="alternate" href="https://example.com/atom-entry"/>
                        <link rel="replies" href="https://example.com/atom-entry/comments"/>
                        <author><name>Jane Doe</name></author>
                        <summary>Atom summary</summary>
                    </entry>
                </feed>"#,
            );

            let item = RawFeedItem::from_entry(&entry, Some("https://origin/x".to_string()));

            assert_eq!(item.title.as_deref(), Some("Atom Entry"));
            assert_eq!(item.links.len(), 1);
            assert_eq!(item.author.as_deref(), Some("Jane Doe"));
            assert_eq!(item.orig_link.as_deref(), Some("https://origin/x"));
            assert_eq!(item.pub_date.as_deref(), Some("2024-05-01T10:00:00+00:00"));
        }
    }
}
