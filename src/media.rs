use crate::item::RawFeedItem;

/// Pick the lead image for an item.
///
/// Sources are tried in order: an image-typed enclosure, `media:content`,
/// `media:thumbnail`, then a generic `image` field. A source without a usable
/// URL falls through to the next one.
pub fn extract_image(item: &RawFeedItem) -> Option<String> {
    enclosure_image(item)
        .or_else(|| item.media_content.as_ref().and_then(|m| m.url()))
        .or_else(|| item.media_thumbnail.as_ref().and_then(|m| m.url()))
        .or_else(|| item.image.as_ref().and_then(|m| m.url()))
        .map(str::to_string)
}

fn enclosure_image(item: &RawFeedItem) -> Option<&str> {
    item.enclosure.as_ref()?.image_url()
}
