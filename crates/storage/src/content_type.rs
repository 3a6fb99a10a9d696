//! File extension to MIME type mapping.

/// Content type used for unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Known extensions and their content types. The first extension listed
/// for a MIME type is the canonical one for reverse lookups.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("avif", "image/avif"),
    ("ico", "image/x-icon"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("json", "application/json"),
];

/// Content type for a file extension.
///
/// # Arguments
/// * `extension` - Extension without the leading dot (case-insensitive)
///
/// # Returns
/// The MIME type, or `application/octet-stream` for unknown extensions.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Canonical extension for a content type.
///
/// Parameters such as `; charset=utf-8` are ignored.
///
/// # Arguments
/// * `content_type` - Value of a `Content-Type` header
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime: &str = content_type.split(';').next().unwrap_or("").trim();
    CONTENT_TYPES
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(mime))
        .map(|(ext, _)| *ext)
}

/// Whether an extension is in the lookup table.
pub fn is_known_extension(extension: &str) -> bool {
    CONTENT_TYPES
        .iter()
        .any(|(ext, _)| ext.eq_ignore_ascii_case(extension))
}

/// Detect a file's type from its leading bytes.
///
/// Sources sometimes serve a format that differs from the extension in the
/// URL (a `.png` that is really a WebP, for instance). Recognises the image
/// and video formats assets are published in.
///
/// # Returns
/// The canonical extension, or `None` if the signature is not recognised.
pub fn detect_extension(bytes: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    const WEBM: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
    const ICO: &[u8] = &[0x00, 0x00, 0x01, 0x00];

    if bytes.starts_with(PNG) {
        Some("png")
    } else if bytes.starts_with(JPEG) {
        Some("jpg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        match &bytes[8..12] {
            b"avif" | b"avis" => Some("avif"),
            b"qt  " => Some("mov"),
            _ => Some("mp4"),
        }
    } else if bytes.starts_with(WEBM) {
        Some("webm")
    } else if bytes.starts_with(ICO) {
        Some("ico")
    } else {
        None
    }
}
