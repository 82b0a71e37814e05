//! Resize-URL generation for the image transform CDN.
//!
//! The CDN decodes a urlsafe-base64 JSON instruction appended to its host
//! prefix. The document layout (field order and separator spacing included)
//! must match what the deployed handler was built against, so the JSON is
//! formatted by hand rather than through a serializer.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

/// Preset name → (width, height), one column per preset in `resized_url_data`.
pub const RESIZE_PRESETS: [(&str, u32, u32); 6] = [
    ("potraightcoverurl", 640, 853),
    ("landscapecoverurl", 853, 640),
    ("squarecoverurl", 800, 800),
    ("socialthumbnailcoverurl", 300, 300),
    ("nextstoryimageurl", 315, 315),
    ("standardurl", 720, 1200),
];

/// Object key for a stored image, derived from its public URL. URLs under the
/// plain CDN host are treated as equivalent to the transform host.
pub fn key_from_public_url(url: &str, cdn_base: &str, media_base: &str) -> String {
    let url = if let Some(rest) = url.strip_prefix(cdn_base) {
        format!("{media_base}{rest}")
    } else {
        url.to_string()
    };
    url.strip_prefix(media_base).unwrap_or(&url).to_string()
}

/// Transform URL for one preset of one stored object.
pub fn resize_url(media_base: &str, bucket: &str, key: &str, width: u32, height: u32) -> String {
    let doc = format!(
        "{{\"bucket\": \"{bucket}\", \"key\": \"{key}\", \"edits\": \
         {{\"resize\": {{\"width\": {width}, \"height\": {height}, \"fit\": \"cover\"}}}}}}"
    );
    format!("{media_base}{}", URL_SAFE.encode(doc))
}
