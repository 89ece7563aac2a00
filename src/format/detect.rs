//! Media type detection for transformation inputs.
//!
//! The type of an input is resolved in three steps, each reached only when
//! the previous one was inconclusive:
//!
//! 1. **Sniff**: byte-prefix heuristics in the style of the WHATWG MIME
//!    sniffing algorithm (markup, well-known image signatures, binary vs text)
//! 2. **Magic numbers**: for payloads sniffed as `application/octet-stream`,
//!    a signature table covering formats the sniffer does not know (TIFF,
//!    AVIF, HEIF, ...)
//! 3. **SVG**: for text payloads longer than 8 bytes, look for an `<svg`
//!    root element and reclassify as `image/svg+xml`
//!
//! Unsupported results map to HTTP 415 Unsupported Media Type.

use crate::error::ServiceError;

// =============================================================================
// Media Types
// =============================================================================

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";
pub const TEXT_XML: &str = "text/xml; charset=utf-8";
pub const IMAGE_SVG: &str = "image/svg+xml";

/// Image types accepted as transformation input.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/tiff",
    IMAGE_SVG,
    "image/heif",
    "image/avif",
];

/// Only this many leading bytes are considered by the sniffer.
const SNIFF_LEN: usize = 512;

/// Minimum payload length before a text payload is tested for SVG.
const MIN_SVG_LEN: usize = 8;

// =============================================================================
// Step 1: Sniffing
// =============================================================================

/// Markup signatures, matched case-insensitively after leading whitespace
/// and followed by a tag-terminating byte.
const HTML_SIGNATURES: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Exact-prefix signatures.
const PREFIX_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", TEXT_PLAIN),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"BM", "image/bmp"),
];

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn is_tag_terminator(b: u8) -> bool {
    b == b' ' || b == b'>'
}

/// Bytes that never appear in text.
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn matches_html(data: &[u8]) -> bool {
    HTML_SIGNATURES.iter().any(|sig| {
        starts_with_ignore_case(data, sig)
            && data
                .get(sig.len())
                .map(|b| is_tag_terminator(*b))
                .unwrap_or(false)
    })
}

fn is_webp(data: &[u8]) -> bool {
    data.len() >= 14 && &data[0..4] == b"RIFF" && &data[8..14] == b"WEBPVP"
}

/// Sniff the media type of `data` from its leading bytes.
///
/// Always returns a type: `application/octet-stream` for unrecognized binary
/// data and `text/plain; charset=utf-8` for unrecognized text.
pub fn sniff(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let first_non_ws = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    let trimmed = &data[first_non_ws..];

    if matches_html(trimmed) {
        return TEXT_HTML;
    }
    if trimmed.starts_with(b"<?xml") {
        return TEXT_XML;
    }

    for &(signature, media_type) in PREFIX_SIGNATURES {
        if data.starts_with(signature) {
            return media_type;
        }
    }

    if is_webp(data) {
        return "image/webp";
    }

    if data.iter().any(|b| is_binary_byte(*b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

// =============================================================================
// Step 2: Magic Numbers
// =============================================================================

/// ISO base media file brands for AVIF.
const AVIF_BRANDS: &[&[u8]] = &[b"avif", b"avis"];

/// ISO base media file brands for HEIF/HEIC.
const HEIF_BRANDS: &[&[u8]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

/// Match `data` against the magic-number table.
///
/// Covers image formats the sniffer does not recognize.
pub fn match_magic(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"II*\x00") || data.starts_with(b"MM\x00*") {
        return Some("image/tiff");
    }

    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        let brand = &data[8..12];
        if AVIF_BRANDS.contains(&brand) {
            return Some("image/avif");
        }
        if HEIF_BRANDS.contains(&brand) {
            return Some("image/heif");
        }
    }

    if data.starts_with(b"\xFF\x0A") || data.starts_with(b"\x00\x00\x00\x0CJXL \x0D\x0A\x87\x0A") {
        return Some("image/jxl");
    }

    if data.starts_with(b"8BPS") {
        return Some("image/vnd.adobe.photoshop");
    }

    None
}

// =============================================================================
// Step 3: SVG
// =============================================================================

/// Skip one construct delimited by `open` .. `close` at the start of `data`.
fn skip_delimited<'a>(data: &'a [u8], open: &[u8], close: &[u8]) -> Option<&'a [u8]> {
    if !starts_with_ignore_case(data, open) {
        return None;
    }
    let rest = &data[open.len()..];
    rest.windows(close.len())
        .position(|w| w == close)
        .map(|end| &rest[end + close.len()..])
}

fn trim_start(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    &data[start..]
}

/// Whether `data` is an SVG document.
///
/// Accepts an optional XML prolog, comments and a doctype before the root
/// element, which must be `<svg` followed by whitespace or `>`.
pub fn is_svg(data: &[u8]) -> bool {
    let mut rest = trim_start(data);

    loop {
        if let Some(next) = skip_delimited(rest, b"<?xml", b"?>") {
            rest = trim_start(next);
        } else if let Some(next) = skip_delimited(rest, b"<!--", b"-->") {
            rest = trim_start(next);
        } else if let Some(next) = skip_delimited(rest, b"<!doctype", b">") {
            rest = trim_start(next);
        } else {
            break;
        }
    }

    starts_with_ignore_case(rest, b"<svg")
        && rest
            .get(4)
            .map(|b| is_whitespace(*b) || *b == b'>')
            .unwrap_or(false)
}

// =============================================================================
// Detection Pipeline
// =============================================================================

/// Resolve the media type of `data` using all three steps.
pub fn detect_media_type(data: &[u8]) -> &'static str {
    let mut media_type = sniff(data);

    if media_type == OCTET_STREAM {
        if let Some(magic) = match_magic(data) {
            media_type = magic;
        }
    }

    if (media_type.starts_with("text/plain") || media_type.starts_with("text/xml"))
        && data.len() > MIN_SVG_LEN
        && is_svg(data)
    {
        media_type = IMAGE_SVG;
    }

    media_type
}

/// Whether `media_type` (parameters allowed) is a supported input image.
pub fn is_supported_image(media_type: &str) -> bool {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    SUPPORTED_IMAGE_TYPES.contains(&essence.as_str())
}

/// Detect the media type and reject anything that is not a supported image.
pub fn validate_image(data: &[u8]) -> Result<&'static str, ServiceError> {
    let media_type = detect_media_type(data);
    if is_supported_image(media_type) {
        Ok(media_type)
    } else {
        Err(ServiceError::UnsupportedMediaType(media_type.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
