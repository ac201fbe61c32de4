//! Canonical article URLs.
//!
//! The canonical form is the deduplication key for articles, so the rules here
//! must stay stable: two links that only differ in tracking parameters, fragment,
//! host case, trailing slash or an `/amp` suffix always map to the same string.

use url::Url;

/// Query parameters dropped in addition to anything prefixed with `utm_`.
/// Compared case-insensitively.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "dclid", "msclkid", "yclid", "mc_cid", "mc_eid", "ref", "igshid",
    "mkt_tok", "_hsenc", "_hsmi", "_ga", "s", "ncid", "ocid", "cmp", "cmpid", "wt.mc_id",
    "wt.mc_t",
];

pub fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize an article link. Unparseable input is returned unchanged.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        if lowered != host && url.set_host(Some(&lowered)).is_err() {
            return raw.to_string();
        }
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !name.is_empty() && !is_tracking_param(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = url.path().to_string();
    let collapsed = path
        .strip_suffix("/amp/")
        .or_else(|| path.strip_suffix("/amp"))
        .map(|prefix| format!("{}/", prefix));
    let path = collapsed.unwrap_or(path);
    let path = if path != "/" && path.ends_with('/') {
        path.trim_end_matches('/').to_string()
    } else {
        path
    };
    let path = if path.is_empty() { "/".to_string() } else { path };
    url.set_path(&path);

    url.to_string()
}
