//! # pictor
//!
//! An image transformation service that reads source images from an inline
//! request body, Azure Blob Storage or S3, and writes results back to storage
//! or to the response. Large images can be turned into Deep Zoom tile
//! pyramids by background jobs.
//!
//! ## Features
//!
//! - **Pluggable storage**: Azure Shared Key, Azure SAS and S3 behind one trait
//! - **Content negotiation**: output format from `type=` or the `Accept` header
//! - **Transformations**: resize, crop, extract, rotate, blur, watermark and more
//! - **Tile pyramids**: bounded worker pool driving an external `vips dzsave`
//!
//! ## Architecture
//!
//! - [`storage`] - Storage providers and the provider factory
//! - [`source`] - Resolves where a request's image comes from and goes to
//! - [`mod@format`] - Media type sniffing and output format negotiation
//! - [`transform`] - Operations, the image engine and the dispatcher
//! - [`tiling`] - Tile pyramid jobs, queue and uploads
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pictor::{
//!     create_router, AppState, BackendFactory, BackendSettings, ImageEngine, JobContext,
//!     RouterConfig, TileJobQueue, VipsTiler,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let factory = Arc::new(BackendFactory::new(BackendSettings {
//!         s3_default_region: "us-east-1".to_string(),
//!         ..BackendSettings::default()
//!     }));
//!     let context = JobContext::new(Arc::new(VipsTiler::default()));
//!     let jobs = TileJobQueue::start(factory.clone(), context, 4, 256);
//!
//!     let state = AppState::new(factory, Arc::new(ImageEngine::new()), jobs);
//!     let router = create_router(state, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8088").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod server;
pub mod source;
pub mod storage;
pub mod tiling;
pub mod transform;

// Re-export commonly used types
pub use config::{CheckConfig, Cli, Command, ServeConfig, StorageArgs};
pub use error::{JobError, ServiceError, StorageError, ToolInvocationError, TransformError};
pub use format::{negotiate_accept, resolve_output, sniff, validate_image, OutputFormat};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use source::{BackendSource, ImageSource, SourceParams, SourceResolver};
pub use storage::{
    BackendFactory, BackendSettings, MemoryProvider, ProviderCredentials, ProviderFactory,
    ProviderKind, StorageProvider, StorageRef,
};
pub use tiling::{
    JobContext, JobId, JobState, JobStatus, JobTicket, TileJobQueue, TileJobRequest,
    TileJobSpec, TileKeys, VipsTiler,
};
pub use transform::{
    DispatchOutcome, ImageEngine, ImageOptions, Operation, TransformDispatcher, TransformEngine,
    TransformOutput, TransformRequest,
};
