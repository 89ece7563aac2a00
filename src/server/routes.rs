//! Router configuration for pictor.
//!
//! # Route Structure
//!
//! ```text
//! /                     - Versions
//! /health               - Health check
//! /form                 - Demo upload forms (optional)
//! /dzsave               - Submit a tile pyramid job (POST only)
//! /dzsave/{job_id}      - Tile job status
//! /{operation}          - Image transformation (GET, POST)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pictor::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(factory, engine, jobs);
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8088").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get},
    Router,
};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    dzsave_handler, form_handler, health_handler, image_handler, job_status_handler,
    versions_handler, AppState, DEFAULT_MAX_BODY_SIZE,
};
use crate::source::SAS_TOKEN_HEADER;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Whether to serve the demo upload page at `/form`
    pub enable_form: bool,

    /// Largest accepted request body in bytes
    pub max_body_size: usize,
}

impl RouterConfig {
    /// Create a router configuration with defaults.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Tracing is enabled
    /// - The demo form is disabled
    /// - Bodies are limited to 32 MiB
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
            enable_form: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Enable or disable the demo form.
    pub fn with_form(mut self, enabled: bool) -> Self {
        self.enable_form = enabled;
        self
    }

    /// Set the request body limit.
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `config` - Router configuration
///
/// # Returns
///
/// A configured Axum router ready to be served.
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let state = state.with_max_body_size(config.max_body_size);
    let cors = build_cors_layer(&config);

    let mut router = Router::new()
        .route("/", get(versions_handler))
        .route("/health", get(health_handler))
        .route("/dzsave", any(dzsave_handler))
        .route("/dzsave/{job_id}", get(job_status_handler))
        .route("/{operation}", get(image_handler).post(image_handler));

    if config.enable_form {
        router = router.route("/form", get(form_handler));
    }

    let router = router
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(SAS_TOKEN_HEADER),
        ])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
