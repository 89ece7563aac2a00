//! Remote object storage providers.
//!
//! Every transformation reads from and writes to storage through the
//! [`StorageProvider`] capability. Three backends implement it:
//!
//! - **Azure Blob, Shared Key** ([`ProviderKind::PrimaryBlob`]): the service's
//!   own storage account, signed with the configured account key
//! - **Azure Blob, SAS** ([`ProviderKind::SasBlob`]): a caller-supplied
//!   shared access signature, no account key needed
//! - **S3** ([`ProviderKind::BucketStore`]): buckets addressed per region
//!
//! Callers hold an `Arc<dyn StorageProvider>` and never branch on the backend.
//! A provider is immutable once built and safe to share between concurrent
//! `fetch`/`store` calls.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────────────┐
//! │ SourceResolver /     │────▶│ ProviderFactory              │
//! │ TileJobQueue         │     │  (kind, credentials) → Arc<> │
//! └──────────────────────┘     └──────────────┬───────────────┘
//!                                             │
//!              ┌──────────────────────────────┼─────────────────────┐
//!              ▼                              ▼                     ▼
//!     ┌──────────────────┐        ┌──────────────────┐   ┌──────────────────┐
//!     │ AzureBlobProvider│        │ AzureBlobProvider│   │   S3Provider     │
//!     │  (Shared Key)    │        │  (SAS token)     │   │  (region)        │
//!     └──────────────────┘        └──────────────────┘   └──────────────────┘
//! ```

mod azure;
mod memory;
mod s3;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StorageError;

pub use azure::{AzureBlobProvider, AzureCredential, AZURE_API_VERSION};
pub use memory::MemoryProvider;
pub use s3::{create_s3_client, S3Provider};

// =============================================================================
// StorageProvider Trait
// =============================================================================

/// Capability to read and write whole objects in a remote store.
///
/// Each call performs exactly one network round trip. There is no retry at
/// this layer; writes overwrite, so callers may retry idempotently.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Download the object at `key` inside `container`.
    ///
    /// Returns [`StorageError::NotFound`] when the object does not exist.
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Upload `data` to `key` inside `container`, replacing any existing object.
    async fn store(&self, data: Bytes, key: &str, container: &str) -> Result<(), StorageError>;

    /// The backend this provider talks to.
    fn kind(&self) -> ProviderKind;
}

// =============================================================================
// Provider Kind
// =============================================================================

/// The three supported backend/authentication combinations.
///
/// The wire identifiers (`"azure"`, `"azureSAS"`, `"s3"`) are the ones
/// accepted in tile job submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Azure Blob Storage with the service's Shared Key credentials
    #[default]
    #[serde(rename = "azure")]
    PrimaryBlob,

    /// Azure Blob Storage with a caller-supplied SAS token
    #[serde(rename = "azureSAS")]
    SasBlob,

    /// S3 bucket in a configurable region
    #[serde(rename = "s3")]
    BucketStore,
}

impl ProviderKind {
    /// Wire identifier of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::PrimaryBlob => "azure",
            ProviderKind::SasBlob => "azureSAS",
            ProviderKind::BucketStore => "s3",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "azure" => Ok(ProviderKind::PrimaryBlob),
            "azureSAS" => Ok(ProviderKind::SasBlob),
            "s3" => Ok(ProviderKind::BucketStore),
            other => Err(StorageError::Config(format!("unknown provider: {}", other))),
        }
    }
}

// =============================================================================
// Storage References
// =============================================================================

/// Per-request credential and addressing hints.
///
/// Which fields matter depends on the provider kind: `region` for S3,
/// `account` and `sas_token` for SAS blobs. Primary blobs use the service's
/// configured account and ignore all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// S3 region (falls back to the configured default)
    pub region: Option<String>,

    /// Azure storage account name (SAS only; falls back to configuration)
    pub account: Option<String>,

    /// Azure shared access signature
    pub sas_token: Option<String>,
}

impl ProviderCredentials {
    /// Credentials for an S3 bucket in `region`.
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Credentials for an Azure SAS token, optionally scoped to an account.
    pub fn sas(token: impl Into<String>, account: Option<String>) -> Self {
        Self {
            sas_token: Some(token.into()),
            account,
            ..Self::default()
        }
    }
}

/// Identifies exactly one remote object and how to reach it.
///
/// Built from a request or job submission and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRef {
    pub kind: ProviderKind,
    pub container: String,
    pub key: String,
    pub credentials: ProviderCredentials,
}

impl StorageRef {
    /// Same backend and container, different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.kind, self.container, self.key)
    }
}

// =============================================================================
// Provider Factory
// =============================================================================

/// Builds a provider for a backend kind and per-request credentials.
///
/// The server and the tile job queue depend on this trait only, so tests can
/// substitute in-memory providers for every backend.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn provider(
        &self,
        kind: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn StorageProvider>, StorageError>;
}

/// Settings shared by every provider the production factory builds.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    /// Azure storage account used for Shared Key access and as SAS fallback
    pub azure_account: Option<String>,

    /// Base64 account key for Shared Key access
    pub azure_account_key: Option<String>,

    /// Custom blob endpoint (e.g. Azurite); default is the public Azure endpoint
    pub azure_endpoint: Option<String>,

    /// Custom S3 endpoint for S3-compatible services (MinIO, etc.)
    pub s3_endpoint: Option<String>,

    /// Region used when a request does not name one
    pub s3_default_region: String,

    /// Force path-style bucket addressing
    pub s3_force_path_style: bool,
}

impl BackendSettings {
    /// Whether S3 clients address buckets by path rather than by host.
    ///
    /// Always true with a custom endpoint.
    pub fn s3_path_style(&self) -> bool {
        self.s3_force_path_style || self.s3_endpoint.is_some()
    }
}

/// Production [`ProviderFactory`] for Azure and S3.
///
/// S3 clients are cached per region since loading the AWS configuration
/// resolves credentials.
pub struct BackendFactory {
    settings: BackendSettings,
    http: reqwest::Client,
    s3_clients: Mutex<HashMap<String, aws_sdk_s3::Client>>,
}

impl BackendFactory {
    /// Create a factory with the given settings.
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            s3_clients: Mutex::new(HashMap::new()),
        }
    }

    /// Get the factory settings.
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    async fn s3_client(&self, region: &str) -> aws_sdk_s3::Client {
        let mut clients = self.s3_clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }

        let client = create_s3_client(&self.settings, region).await;
        clients.insert(region.to_string(), client.clone());
        client
    }
}

#[async_trait]
impl ProviderFactory for BackendFactory {
    async fn provider(
        &self,
        kind: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        match kind {
            ProviderKind::PrimaryBlob => {
                let account = self.settings.azure_account.as_deref().ok_or_else(|| {
                    StorageError::Config("Azure account name is not configured".to_string())
                })?;
                let key = self.settings.azure_account_key.as_deref().ok_or_else(|| {
                    StorageError::Config("Azure account key is not configured".to_string())
                })?;

                let provider = AzureBlobProvider::with_shared_key(
                    self.http.clone(),
                    account,
                    key,
                    self.settings.azure_endpoint.as_deref(),
                )?;
                Ok(Arc::new(provider))
            }
            ProviderKind::SasBlob => {
                let token = credentials
                    .sas_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| StorageError::Config("missing SAS token".to_string()))?;
                let account = credentials
                    .account
                    .as_deref()
                    .filter(|a| !a.is_empty())
                    .or(self.settings.azure_account.as_deref())
                    .ok_or_else(|| {
                        StorageError::Config("missing Azure account name for SAS token".to_string())
                    })?;

                let provider = AzureBlobProvider::with_sas_token(
                    self.http.clone(),
                    account,
                    token,
                    self.settings.azure_endpoint.as_deref(),
                )?;
                Ok(Arc::new(provider))
            }
            ProviderKind::BucketStore => {
                let region = credentials
                    .region
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .unwrap_or(&self.settings.s3_default_region)
                    .to_string();
                let client = self.s3_client(&region).await;
                Ok(Arc::new(S3Provider::new(client, region)))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
