use std::borrow::Cow;
use std::collections::HashMap;

use feed_rs::parser;
use quick_xml::escape::unescape;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::item::RawFeedItem;

/// Downloads feeds and turns them into raw items.
pub struct FeedFetcher {
    client: Client,
    accept: String,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            accept: config.accept.clone(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<RawFeedItem>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, self.accept.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        let items = Self::parse(&bytes)?;
        debug!("Parsed {} items from {}", items.len(), url);
        Ok(items)
    }

    /// Parse an RSS, Atom or JSON feed body.
    pub fn parse(bytes: &[u8]) -> Result<Vec<RawFeedItem>, FetchError> {
        // feed_rs doesn't surface <feedburner:origLink>, so pull it from the raw XML
        let orig_links = Self::extract_orig_links_from_xml(bytes);

        let feed = parser::parse(bytes)?;

        let items = feed
            .entries
            .iter()
            .map(|entry| {
                let orig_link = orig_links
                    .get(entry.id.trim())
                    .or_else(|| {
                        entry
                            .links
                            .iter()
                            .find_map(|l| orig_links.get(l.href.trim()))
                    })
                    .cloned();
                RawFeedItem::from_entry(entry, orig_link)
            })
            .collect();

        Ok(items)
    }

    /// Map each item's `<link>`, `<guid>` and `<id>` to its `<feedburner:origLink>`.
    pub fn extract_orig_links_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
        let mut orig_links = HashMap::new();
        let xml_str = match std::str::from_utf8(xml_bytes) {
            Ok(s) => s,
            Err(_) => return orig_links,
        };

        let blocks = Self::item_blocks(xml_str, "item").chain(Self::item_blocks(xml_str, "entry"));

        for item in blocks {
            let Some(orig_link) = Self::extract_xml_element(item, "feedburner:origLink") else {
                continue;
            };
            if orig_link.is_empty() {
                continue;
            }

            for key_tag in ["link", "guid", "id"] {
                if let Some(key) = Self::extract_xml_element(item, key_tag) {
                    if !key.is_empty() {
                        orig_links.insert(key, orig_link.clone());
                    }
                }
            }
        }

        orig_links
    }

    fn item_blocks<'a>(xml: &'a str, tag: &str) -> impl Iterator<Item = &'a str> {
        let open = format!("<{}", tag);
        let close = format!("</{}>", tag);
        let blocks: Vec<&'a str> = xml
            .split(open.as_str())
            .skip(1)
            .filter(|block| {
                block
                    .chars()
                    .next()
                    .is_some_and(|c| c == '>' || c.is_whitespace())
            })
            .map(|block| {
                let end = block.find(close.as_str()).unwrap_or(block.len());
                &block[..end]
            })
            .collect();
        blocks.into_iter()
    }

    /// Text of the first `<tag>` element that has a body. Attributes are allowed,
    /// a CDATA wrapper is removed and entity references are decoded.
    pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
        let open = format!("<{}", tag);
        let close = format!("</{}>", tag);

        let mut search_from = 0;
        while let Some(pos) = xml[search_from..].find(&open) {
            let after = search_from + pos + open.len();
            let rest = &xml[after..];
            let next = rest.chars().next()?;

            if next != '>' && !next.is_whitespace() {
                search_from = after;
                continue;
            }

            let tag_end = after + rest.find('>')?;
            if xml[..tag_end].ends_with('/') {
                search_from = tag_end;
                continue;
            }

            let body_start = tag_end + 1;
            let body_end = body_start + xml[body_start..].find(&close)?;
            let body = xml[body_start..body_end].trim();
            if let Some(cdata) = body
                .strip_prefix("<![CDATA[")
                .and_then(|b| b.strip_suffix("]]>"))
            {
                return Some(cdata.trim().to_string());
            }

            // Malformed references are kept verbatim.
            let text = unescape(body).unwrap_or(Cow::Borrowed(body));
            return Some(text.trim().to_string());
        }

        None
    }
}
