//! Azure Blob Storage provider.
//!
//! Talks to the Blob REST API with `reqwest`. Two credential styles are
//! supported:
//!
//! - **Shared Key**: every request carries an `Authorization: SharedKey`
//!   header, an HMAC-SHA256 over the canonical request signed with the
//!   account key.
//! - **SAS token**: the caller's shared access signature is appended to the
//!   blob URL as its query string; no Authorization header is sent.
//!
//! Blob URLs are `{endpoint}/{container}/{key}` where the default endpoint is
//! `https://{account}.blob.core.windows.net`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use tracing::debug;
use url::Url;

use super::{ProviderKind, StorageProvider};
use crate::error::StorageError;

/// Azure REST API version sent with every request.
pub const AZURE_API_VERSION: &str = "2023-11-03";

const BLOB_CONTENT_TYPE: &str = "application/octet-stream";

type HmacSha256 = Hmac<Sha256>;

/// How requests to the account are authorized.
#[derive(Clone)]
pub enum AzureCredential {
    /// Decoded account key for Shared Key signing
    SharedKey { key: Vec<u8> },

    /// SAS token without the leading `?`
    Sas { token: String },
}

impl std::fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureCredential::SharedKey { .. } => f.write_str("SharedKey(..)"),
            AzureCredential::Sas { .. } => f.write_str("Sas(..)"),
        }
    }
}

/// [`StorageProvider`] backed by an Azure storage account.
#[derive(Debug, Clone)]
pub struct AzureBlobProvider {
    client: reqwest::Client,
    account: String,
    endpoint: Url,
    credential: AzureCredential,
}

impl AzureBlobProvider {
    /// Create a provider that signs requests with the account key.
    ///
    /// `account_key` is the base64 key shown in the Azure portal.
    pub fn with_shared_key(
        client: reqwest::Client,
        account: &str,
        account_key: &str,
        endpoint: Option<&str>,
    ) -> Result<Self, StorageError> {
        let key = BASE64_STANDARD
            .decode(account_key.trim())
            .map_err(|e| StorageError::Config(format!("invalid Azure account key: {}", e)))?;

        Self::build(client, account, endpoint, AzureCredential::SharedKey { key })
    }

    /// Create a provider that authorizes requests with a SAS token.
    pub fn with_sas_token(
        client: reqwest::Client,
        account: &str,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Self, StorageError> {
        let token = token.strip_prefix('?').unwrap_or(token);
        if token.is_empty() {
            return Err(StorageError::Config("empty SAS token".to_string()));
        }

        Self::build(
            client,
            account,
            endpoint,
            AzureCredential::Sas {
                token: token.to_string(),
            },
        )
    }

    fn build(
        client: reqwest::Client,
        account: &str,
        endpoint: Option<&str>,
        credential: AzureCredential,
    ) -> Result<Self, StorageError> {
        if account.is_empty() {
            return Err(StorageError::Config("empty Azure account name".to_string()));
        }

        let endpoint = match endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", account),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| StorageError::Config(format!("invalid Azure endpoint: {}", e)))?;

        Ok(Self {
            client,
            account: account.to_string(),
            endpoint,
            credential,
        })
    }

    /// Get the storage account name.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Build the URL of a blob, including the SAS query when applicable.
    pub fn blob_url(&self, container: &str, key: &str) -> Url {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let base_path = self.endpoint.path().trim_end_matches('/');
        let mut url = self.endpoint.clone();
        url.set_path(&format!("{}/{}/{}", base_path, container, encoded_key));

        if let AzureCredential::Sas { token } = &self.credential {
            url.set_query(Some(token));
        }

        url
    }

    /// Compute the Shared Key `Authorization` header value.
    ///
    /// String to sign, one field per line:
    /// VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    /// Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    /// If-Unmodified-Since, Range, CanonicalizedHeaders, CanonicalizedResource.
    fn shared_key_authorization(
        &self,
        key: &[u8],
        method: &Method,
        url: &Url,
        content_length: usize,
        content_type: &str,
        ms_headers: &[(&str, &str)],
    ) -> Result<String, StorageError> {
        let content_length = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        let mut headers: Vec<(String, &str)> = ms_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), *value))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonicalized_headers = headers
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect::<Vec<_>>()
            .join("\n");
        let canonicalized_resource = format!("/{}{}", self.account, url.path());

        let string_to_sign = format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
            method, content_length, content_type, canonicalized_headers, canonicalized_resource
        );

        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| StorageError::Config(format!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Build a request with the version/date headers and authorization.
    fn request(
        &self,
        method: Method,
        container: &str,
        key: &str,
        body: Option<Bytes>,
    ) -> Result<reqwest::RequestBuilder, StorageError> {
        let url = self.blob_url(container, key);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let is_upload = body.is_some();
        let content_length = body.as_ref().map(|b| b.len()).unwrap_or(0);
        let content_type = if is_upload { BLOB_CONTENT_TYPE } else { "" };

        let mut ms_headers = vec![("x-ms-date", date.as_str()), ("x-ms-version", AZURE_API_VERSION)];
        if is_upload {
            ms_headers.push(("x-ms-blob-type", "BlockBlob"));
        }

        let authorization = match &self.credential {
            AzureCredential::SharedKey { key } => Some(self.shared_key_authorization(
                key,
                &method,
                &url,
                content_length,
                content_type,
                &ms_headers,
            )?),
            AzureCredential::Sas { .. } => None,
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &ms_headers {
            builder = builder.header(*name, *value);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body);
        }

        Ok(builder)
    }

    async fn error_from_response(
        context: &str,
        location: String,
        response: reqwest::Response,
    ) -> StorageError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return StorageError::NotFound(location);
        }

        let body = response.text().await.unwrap_or_default();
        StorageError::Remote(format!("Azure {} {}: HTTP {} - {}", context, location, status, body))
    }

    fn location(&self, container: &str, key: &str) -> String {
        format!("azure://{}/{}/{}", self.account, container, key)
    }
}

#[async_trait]
impl StorageProvider for AzureBlobProvider {
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        debug!(account = %self.account, container, key, "Downloading blob");

        let response = self
            .request(Method::GET, container, key, None)?
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let location = self.location(container, key);
            return Err(Self::error_from_response("download", location, response).await);
        }

        response
            .bytes()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn store(&self, data: Bytes, key: &str, container: &str) -> Result<(), StorageError> {
        debug!(
            account = %self.account,
            container,
            key,
            bytes = data.len(),
            "Uploading blob"
        );

        let response = self
            .request(Method::PUT, container, key, Some(data))?
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let location = self.location(container, key);
            return Err(Self::error_from_response("upload", location, response).await);
        }

        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        match self.credential {
            AzureCredential::SharedKey { .. } => ProviderKind::PrimaryBlob,
            AzureCredential::Sas { .. } => ProviderKind::SasBlob,
        }
    }
}
