//! Configuration management for pictor.
//!
//! Configuration comes from command-line arguments via clap, with environment
//! variable fallbacks and defaults for every optional setting.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use pictor::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Check(config) => println!("Checking {}", config.vips_path),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `PICTOR_HOST` - Server bind address (default: 0.0.0.0)
//! - `PICTOR_PORT` - Server port (default: 8088)
//! - `AZURE_ACCOUNT_NAME` - Azure storage account for Shared Key access
//! - `AZURE_ACCOUNT_KEY` - Base64 Azure account key
//! - `PICTOR_AZURE_ENDPOINT` - Custom blob endpoint (Azurite, etc.)
//! - `PICTOR_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `PICTOR_S3_REGION` - Default S3 region (default: us-east-1)
//! - `PICTOR_S3_PATH_STYLE` - Force path-style S3 addressing
//! - `PICTOR_VIPS_PATH` - Tiling tool executable (default: vips)
//! - `PICTOR_STAGING_DIR` - Parent directory for job staging (default: system temp)
//! - `PICTOR_TILE_WORKERS` - Concurrent tile jobs (default: 4)
//! - `PICTOR_UPLOAD_CONCURRENCY` - Parallel tile uploads per job (default: 32)
//! - `PICTOR_JOB_QUEUE_CAPACITY` - Queued tile jobs before rejecting (default: 256)
//! - `PICTOR_MAX_BODY_SIZE` - Largest accepted request body in bytes (default: 32 MiB)
//! - `PICTOR_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `PICTOR_ENABLE_FORM` - Serve the demo upload page at /form

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::server::DEFAULT_MAX_BODY_SIZE;
use crate::storage::{BackendSettings, ProviderKind};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8088;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default tiling tool.
pub const DEFAULT_VIPS_PATH: &str = "vips";

/// Default number of tile jobs running at once.
pub const DEFAULT_TILE_WORKERS: usize = 4;

/// Default number of parallel uploads per tile job.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 32;

/// Default number of tile jobs waiting for a worker.
pub const DEFAULT_JOB_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pictor - image transformation and tile pyramid service.
///
/// Reads images from an inline body, Azure Blob Storage or S3, transforms
/// them, and writes Deep Zoom pyramids back to storage in the background.
#[derive(Parser, Debug, Clone)]
#[command(name = "pictor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Verify the tiling tool and, optionally, storage access
    Check(CheckConfig),
}

/// Storage settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Azure storage account used for Shared Key access.
    #[arg(long, env = "AZURE_ACCOUNT_NAME")]
    pub azure_account: Option<String>,

    /// Base64 Azure account key.
    #[arg(long, env = "AZURE_ACCOUNT_KEY", hide_env_values = true)]
    pub azure_account_key: Option<String>,

    /// Custom Azure blob endpoint (Azurite, etc.).
    ///
    /// If not specified, uses https://{account}.blob.core.windows.net.
    #[arg(long, env = "PICTOR_AZURE_ENDPOINT")]
    pub azure_endpoint: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "PICTOR_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Region used when a request does not name one.
    #[arg(long, default_value = DEFAULT_REGION, env = "PICTOR_S3_REGION")]
    pub s3_region: String,

    /// Force path-style S3 addressing (implied by --s3-endpoint).
    #[arg(long, env = "PICTOR_S3_PATH_STYLE")]
    pub s3_path_style: bool,
}

impl StorageArgs {
    /// Settings for the production provider factory.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            azure_account: self.azure_account.clone(),
            azure_account_key: self.azure_account_key.clone(),
            azure_endpoint: self.azure_endpoint.clone(),
            s3_endpoint: self.s3_endpoint.clone(),
            s3_default_region: self.s3_region.clone(),
            s3_force_path_style: self.s3_path_style,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PICTOR_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PICTOR_PORT")]
    pub port: u16,

    /// Largest accepted request body in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_SIZE, env = "PICTOR_MAX_BODY_SIZE")]
    pub max_body_size: usize,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    #[command(flatten)]
    pub storage: StorageArgs,

    // =========================================================================
    // Tiling Configuration
    // =========================================================================
    /// Path to the vips executable.
    #[arg(long, default_value = DEFAULT_VIPS_PATH, env = "PICTOR_VIPS_PATH")]
    pub vips_path: String,

    /// Directory under which per-job staging directories are created.
    #[arg(long, env = "PICTOR_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Number of tile jobs processed at once.
    #[arg(long, default_value_t = DEFAULT_TILE_WORKERS, env = "PICTOR_TILE_WORKERS")]
    pub tile_workers: usize,

    /// Parallel uploads per tile job.
    #[arg(long, default_value_t = DEFAULT_UPLOAD_CONCURRENCY, env = "PICTOR_UPLOAD_CONCURRENCY")]
    pub upload_concurrency: usize,

    /// Tile jobs accepted while all workers are busy.
    #[arg(long, default_value_t = DEFAULT_JOB_QUEUE_CAPACITY, env = "PICTOR_JOB_QUEUE_CAPACITY")]
    pub job_queue_capacity: usize,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PICTOR_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Serve the demo upload page at /form.
    #[arg(long, default_value_t = false, env = "PICTOR_ENABLE_FORM")]
    pub enable_form: bool,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty. Set --host or PICTOR_HOST".to_string());
        }

        if self.tile_workers == 0 {
            return Err("tile_workers must be greater than 0".to_string());
        }
        if self.upload_concurrency == 0 {
            return Err("upload_concurrency must be greater than 0".to_string());
        }
        if self.job_queue_capacity == 0 {
            return Err("job_queue_capacity must be greater than 0".to_string());
        }
        if self.max_body_size == 0 {
            return Err("max_body_size must be greater than 0".to_string());
        }

        if self.vips_path.trim().is_empty() {
            return Err("vips_path must not be empty".to_string());
        }

        // Shared Key access needs both halves
        if self.storage.azure_account_key.is_some() && self.storage.azure_account.is_none() {
            return Err(
                "Azure account key given without an account name. Set --azure-account or AZURE_ACCOUNT_NAME"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_settings(&self) -> BackendSettings {
        self.storage.backend_settings()
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Path to the vips executable.
    #[arg(long, default_value = DEFAULT_VIPS_PATH, env = "PICTOR_VIPS_PATH")]
    pub vips_path: String,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Backend to fetch a test object from: azure, azureSAS or s3.
    #[arg(long)]
    pub provider: Option<String>,

    /// Container or bucket of the test object.
    #[arg(long)]
    pub container: Option<String>,

    /// Key of the test object.
    #[arg(long)]
    pub key: Option<String>,

    /// SAS token for the azureSAS provider.
    #[arg(long, env = "PICTOR_SAS_TOKEN", hide_env_values = true)]
    pub sas_token: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// A fully specified test fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub kind: ProviderKind,
    pub container: String,
    pub key: String,
}

impl CheckConfig {
    /// The object to fetch, if one was requested.
    ///
    /// Either all of provider, container and key are given or none is.
    pub fn fetch_target(&self) -> Result<Option<FetchTarget>, String> {
        match (&self.provider, &self.container, &self.key) {
            (None, None, None) => Ok(None),
            (Some(provider), Some(container), Some(key)) => {
                let kind = provider.parse::<ProviderKind>().map_err(|e| e.to_string())?;
                if kind == ProviderKind::SasBlob && self.sas_token.is_none() {
                    return Err("the azureSAS provider needs --sas-token".to_string());
                }
                Ok(Some(FetchTarget {
                    kind,
                    container: container.clone(),
                    key: key.clone(),
                }))
            }
            _ => Err("--provider, --container and --key must be given together".to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
