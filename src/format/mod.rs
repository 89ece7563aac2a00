//! Content negotiation for transformation inputs and outputs.
//!
//! - [`detect`]: sniffs and validates the media type of an input
//! - [`negotiate`]: chooses the output format, optionally from `Accept`

pub mod detect;
pub mod negotiate;

pub use detect::{
    detect_media_type, is_supported_image, is_svg, match_magic, sniff, validate_image,
    SUPPORTED_IMAGE_TYPES,
};
pub use negotiate::{negotiate_accept, resolve_output, Negotiated, OutputFormat, AUTO_TOKEN};
