//! Output format selection.
//!
//! The `type` parameter of a transform request chooses the output format:
//!
//! - absent or empty: the engine keeps its default (the source format)
//! - a known token (`jpeg`, `png`, ...): that format
//! - `auto`: negotiated from the caller's `Accept` header
//! - anything else: rejected with `InvalidOutputFormat`
//!
//! When negotiation happened the response varies by `Accept`, so it must
//! declare `Vary: Accept` on success and on a failed transform alike.

use std::fmt;

use crate::error::ServiceError;

/// Token that requests negotiation from the `Accept` header.
pub const AUTO_TOKEN: &str = "auto";

/// Formats negotiable from `Accept`, in the order they are considered.
const NEGOTIABLE: &[(&str, OutputFormat)] = &[
    ("image/webp", OutputFormat::Webp),
    ("image/png", OutputFormat::Png),
    ("image/jpeg", OutputFormat::Jpeg),
];

/// Output image formats the engine can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
}

impl OutputFormat {
    /// Parse a `type` token. `jpg` is accepted as an alias of `jpeg`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::Webp),
            "gif" => Some(OutputFormat::Gif),
            "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }

    /// Map a media type to the format that encodes it.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split(';').next().unwrap_or("").trim() {
            "image/jpeg" => Some(OutputFormat::Jpeg),
            "image/png" => Some(OutputFormat::Png),
            "image/webp" => Some(OutputFormat::Webp),
            "image/gif" => Some(OutputFormat::Gif),
            "image/tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }

    pub const fn token(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub const fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Tiff => "image/tiff",
        }
    }

    /// The `image` crate format used to encode this output.
    pub const fn image_format(&self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Webp => image::ImageFormat::WebP,
            OutputFormat::Gif => image::ImageFormat::Gif,
            OutputFormat::Tiff => image::ImageFormat::Tiff,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Pick the first negotiable format named in an `Accept` header.
///
/// Entries are considered in the order the client listed them; media type
/// parameters (including `q`) are ignored.
pub fn negotiate_accept(accept: &str) -> Option<OutputFormat> {
    accept.split(',').find_map(|entry| {
        let media_type = entry.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        NEGOTIABLE
            .iter()
            .find(|(mime, _)| *mime == media_type)
            .map(|(_, format)| *format)
    })
}

/// Result of output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// Chosen format; `None` keeps the engine default
    pub format: Option<OutputFormat>,

    /// The response must carry `Vary: Accept`
    pub vary_accept: bool,
}

/// Resolve the output format from the `type` parameter and `Accept` header.
pub fn resolve_output(
    type_param: Option<&str>,
    accept: Option<&str>,
) -> Result<Negotiated, ServiceError> {
    let token = type_param.map(str::trim).unwrap_or("");

    if token.is_empty() {
        return Ok(Negotiated::default());
    }

    if token.eq_ignore_ascii_case(AUTO_TOKEN) {
        return Ok(Negotiated {
            format: accept.and_then(negotiate_accept),
            vary_accept: true,
        });
    }

    match OutputFormat::from_token(token) {
        Some(format) => Ok(Negotiated {
            format: Some(format),
            vary_accept: false,
        }),
        None => Err(ServiceError::InvalidOutputFormat(token.to_string())),
    }
}
