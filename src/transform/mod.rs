//! Image transformation layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TransformDispatcher                         │
//! │  1. Fetch overlay (watermarkimage only)                         │
//! │  2. Run engine on the blocking pool                             │
//! │  3. Route output: storage destination or inline response        │
//! └───────────────┬──────────────────────────────┬──────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!     ┌──────────────────────┐       ┌──────────────────────┐
//!     │   TransformEngine    │       │   StorageProvider    │
//!     │  (ImageEngine)       │       │  (destination)       │
//!     └──────────────────────┘       └──────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Operation`]: the transformations exposed as routes
//! - [`ImageOptions`]: typed query parameters shared by all operations
//! - [`TransformEngine`]: the pixel-processing capability
//! - [`ImageEngine`]: engine built on the `image` crate
//! - [`TransformDispatcher`]: runs the engine and routes its output

mod dispatch;
mod engine;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::TransformError;
use crate::format::OutputFormat;

pub use dispatch::{DispatchOutcome, TransformDispatcher};
pub use engine::{
    clamp_quality, is_valid_quality, ImageEngine, DEFAULT_QUALITY, MAX_DIMENSION, MAX_QUALITY,
    MIN_QUALITY,
};

// =============================================================================
// Operations
// =============================================================================

/// A transformation exposed as `/{operation}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Resize,
    Enlarge,
    Crop,
    Extract,
    Zoom,
    Thumbnail,
    Rotate,
    AutoRotate,
    Flip,
    Flop,
    Convert,
    Blur,
    Info,
    WatermarkImage,
}

impl Operation {
    /// Every operation, in route listing order.
    pub const ALL: [Operation; 14] = [
        Operation::Resize,
        Operation::Enlarge,
        Operation::Crop,
        Operation::Extract,
        Operation::Zoom,
        Operation::Thumbnail,
        Operation::Rotate,
        Operation::AutoRotate,
        Operation::Flip,
        Operation::Flop,
        Operation::Convert,
        Operation::Blur,
        Operation::Info,
        Operation::WatermarkImage,
    ];

    /// Route name of the operation.
    pub const fn name(&self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Enlarge => "enlarge",
            Operation::Crop => "crop",
            Operation::Extract => "extract",
            Operation::Zoom => "zoom",
            Operation::Thumbnail => "thumbnail",
            Operation::Rotate => "rotate",
            Operation::AutoRotate => "autorotate",
            Operation::Flip => "flip",
            Operation::Flop => "flop",
            Operation::Convert => "convert",
            Operation::Blur => "blur",
            Operation::Info => "info",
            Operation::WatermarkImage => "watermarkimage",
        }
    }

    /// Whether the operation needs a secondary overlay asset.
    pub const fn requires_overlay(&self) -> bool {
        matches!(self, Operation::WatermarkImage)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .find(|op| op.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown operation: {}", s))
    }
}

// =============================================================================
// Options
// =============================================================================

/// Anchor used when cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    #[default]
    #[serde(alias = "center")]
    Centre,
    North,
    South,
    East,
    West,
}

/// Transformation parameters parsed from the query string.
///
/// Backend-selecting parameters live in the same query string and are
/// ignored here; see [`crate::source::SourceParams`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,

    /// Encoder quality (1-100) for lossy formats
    pub quality: Option<u8>,

    /// PNG compression level (0-9)
    pub compression: Option<u8>,

    /// Rotation angle in degrees (multiple of 90)
    pub rotate: Option<u16>,

    pub top: Option<u32>,
    pub left: Option<u32>,
    pub areawidth: Option<u32>,
    pub areaheight: Option<u32>,

    /// Zoom factor
    pub factor: Option<f32>,

    /// Gaussian blur sigma
    pub sigma: Option<f32>,

    /// Output type token (`jpeg`, `png`, ..., or `auto`)
    #[serde(rename = "type")]
    pub output_type: Option<String>,

    /// Ignore aspect ratio when both dimensions are given
    #[serde(default)]
    pub force: bool,

    /// Key of the overlay image, fetched from the request's backend
    pub image: Option<String>,

    /// Overlay opacity (0.0-1.0)
    pub opacity: Option<f32>,

    #[serde(default)]
    pub gravity: Gravity,
}

// =============================================================================
// Engine Contract
// =============================================================================

/// Everything the engine needs for one run.
///
/// Created per request and never mutated after validation.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// Validated input image
    pub input: Bytes,

    pub operation: Operation,

    pub options: ImageOptions,

    /// Negotiated output format; `None` keeps the source format
    pub output_format: Option<OutputFormat>,

    /// Secondary asset for overlay operations
    pub overlay: Option<Bytes>,
}

impl TransformRequest {
    pub fn new(input: Bytes, operation: Operation, options: ImageOptions) -> Self {
        Self {
            input,
            operation,
            options,
            output_format: None,
            overlay: None,
        }
    }

    pub fn with_output_format(mut self, format: Option<OutputFormat>) -> Self {
        self.output_format = format;
        self
    }
}

/// Result of a successful transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub body: Bytes,
    pub mime: String,
}

/// The pixel-processing capability.
///
/// Implementations are CPU-bound and synchronous; the dispatcher calls them
/// from the blocking thread pool. Every error is a client error.
pub trait TransformEngine: Send + Sync {
    /// Engine name and version, reported by the version endpoint.
    fn version(&self) -> String;

    fn run(&self, request: &TransformRequest) -> Result<TransformOutput, TransformError>;
}
