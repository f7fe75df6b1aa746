//! Azure Blob Storage download client.
//!
//! Only the single call the service needs is implemented: download a blob
//! by container and name.  Credentials come from a storage connection
//! string and may be a SAS token, an account key (Shared Key signing) or
//! nothing for public containers.

use std::str::FromStr;

use base64::prelude::*;
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde::Deserialize;
use sha2::Sha256;

use super::{BlobBackend, BlobError, BlobStream};

const STORAGE_VERSION: &str = "2021-08-06";
const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Debug, thiserror::Error)]
pub enum ConnectionStringError {
    #[error("connection string is empty")]
    Empty,
    #[error("malformed connection string segment '{0}'")]
    MalformedSegment(String),
    #[error("connection string has neither BlobEndpoint nor AccountName")]
    MissingEndpoint,
    #[error("invalid blob endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("AccountKey is not valid base64")]
    InvalidKey(#[from] base64::DecodeError),
}

#[derive(Clone, PartialEq, Eq)]
pub enum BlobCredential {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
    Anonymous,
}

impl std::fmt::Debug for BlobCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobCredential::SharedKey { account, .. } => {
                f.debug_struct("SharedKey").field("account", account).finish_non_exhaustive()
            }
            BlobCredential::Sas(_) => f.write_str("Sas"),
            BlobCredential::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Parsed storage connection string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionString {
    pub blob_endpoint: Url,
    pub credential: BlobCredential,
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut protocol = "https".to_string();
        let mut account = None;
        let mut account_key = None;
        let mut suffix = "core.windows.net".to_string();
        let mut blob_endpoint = None;
        let mut sas = None;
        let mut dev_storage = false;

        let mut seen = false;
        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            seen = true;
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = value,
                "accountname" => account = Some(value),
                "accountkey" => account_key = Some(value),
                "endpointsuffix" => suffix = value,
                "blobendpoint" => blob_endpoint = Some(value),
                "sharedaccesssignature" => sas = Some(value),
                "usedevelopmentstorage" => dev_storage = value.eq_ignore_ascii_case("true"),
                other => tracing::debug!(key = other, "ignoring connection string key"),
            }
        }
        if !seen {
            return Err(ConnectionStringError::Empty);
        }

        if dev_storage {
            account = account.or_else(|| Some(DEV_ACCOUNT.to_string()));
            account_key = account_key.or_else(|| Some(DEV_KEY.to_string()));
            blob_endpoint = blob_endpoint.or_else(|| Some(DEV_ENDPOINT.to_string()));
        }

        let endpoint = match (blob_endpoint, account.as_deref()) {
            (Some(endpoint), _) => endpoint,
            (None, Some(name)) => format!("{}://{}.blob.{}", protocol, name, suffix),
            (None, None) => return Err(ConnectionStringError::MissingEndpoint),
        };
        let blob_endpoint = Url::parse(&endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or(ConnectionStringError::InvalidEndpoint(endpoint))?;

        let credential = match (sas, account, account_key) {
            (Some(sas), _, _) => BlobCredential::Sas(sas.trim_start_matches('?').to_string()),
            (None, Some(account), Some(key)) => BlobCredential::SharedKey {
                account,
                key: BASE64_STANDARD.decode(key)?,
            },
            _ => BlobCredential::Anonymous,
        };

        Ok(Self {
            blob_endpoint,
            credential,
        })
    }
}

#[derive(Clone)]
pub struct BlobStorageClient {
    connection: ConnectionString,
    client: reqwest::Client,
}

impl BlobStorageClient {
    pub fn new(connection: ConnectionString) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { connection, client })
    }

    fn blob_url(&self, container: &str, blob: &str) -> Result<Url, BlobError> {
        let mut url = self.connection.blob_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BlobError::Other("blob endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .push(container)
            .extend(blob.split('/'));
        if let BlobCredential::Sas(sas) = &self.connection.credential {
            url.set_query(Some(sas));
        }
        Ok(url)
    }
}

fn string_to_sign(account: &str, path: &str, date: &str) -> String {
    // Verb followed by eleven empty standard headers.
    format!(
        "GET{}x-ms-date:{}\nx-ms-version:{}\n/{}{}",
        "\n".repeat(12),
        date,
        STORAGE_VERSION,
        account,
        path
    )
}

fn sign(key: &[u8], payload: &str) -> Result<String, BlobError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| BlobError::Other(format!("invalid account key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Body of a storage service error response.  Only `Message` is read;
/// `Code` arrives in the `x-ms-error-code` header as well.
#[derive(Debug, Deserialize)]
struct StorageErrorBody {
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Unescaped text of `Error/Message`, if the body is a storage error.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim_start_matches('\u{feff}');
    let parsed: StorageErrorBody = match quick_xml::de::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(error = %err, "storage error body is not XML");
            return None;
        }
    };
    parsed
        .message
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

#[async_trait::async_trait]
impl BlobBackend for BlobStorageClient {
    async fn fetch_blob(&self, container: &str, blob: &str) -> Result<BlobStream, BlobError> {
        let url = self.blob_url(container, blob)?;
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let mut request = self
            .client
            .get(url.clone())
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_VERSION);
        if let BlobCredential::SharedKey { account, key } = &self.connection.credential {
            let signature = sign(key, &string_to_sign(account, url.path(), &date))?;
            request = request.header("Authorization", format!("SharedKey {}:{}", account, signature));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(container, blob, "blob download started");
            return Ok(BlobStream::new(response));
        }

        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Blob request failed")
                .to_string()
        });
        Err(BlobError::RequestFailed {
            status: status.as_u16(),
            code,
            message,
        })
    }
}
