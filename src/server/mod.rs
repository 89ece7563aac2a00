//! HTTP server layer for pictor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET|POST /{operation}        POST /dzsave                │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    form     │  │        routes           │  │
//! │  │ (requests)  │  │ (demo page) │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod form;
pub mod handlers;
pub mod routes;

pub use handlers::{
    dzsave_handler, form_handler, health_handler, image_handler, job_status_handler,
    versions_handler, AppState, ErrorResponse, HealthResponse, VersionsResponse,
    DEFAULT_MAX_BODY_SIZE,
};
pub use routes::{create_router, RouterConfig};
