use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;

use crate::backend::analysis::default_api_version;
use crate::backend::{AnalysisClientConfig, ConnectionString};
use crate::DEFAULT_MAX_REQUEST_BYTES;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_token: String,
    pub analysis: AnalysisClientConfig,
    /// Model used by the routes without a `{modelId}` segment.  Those
    /// routes are only mounted when this is set.
    pub default_model_id: Option<String>,
    pub blob_connection: ConnectionString,
    pub max_request_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_token = required("FIELDWISE_API_TOKEN")?;

        let endpoint_raw = required("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT")?;
        let endpoint = Url::parse(&endpoint_raw)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                anyhow!(
                    "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT must be an absolute URL, got '{}'",
                    endpoint_raw
                )
            })?;
        let api_key = required("AZURE_DOCUMENT_INTELLIGENCE_API_KEY")?;
        let api_version =
            optional("AZURE_DOCUMENT_INTELLIGENCE_API_VERSION")?.unwrap_or_else(default_api_version);
        let default_model_id = optional("AZURE_DOCUMENT_INTELLIGENCE_MODEL_ID")?;
        let poll_interval_ms =
            parse_optional_u64("FIELDWISE_POLL_INTERVAL_MS")?.unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let blob_connection = required("AZURE_BLOB_CONNECTION_STRING")?
            .parse::<ConnectionString>()
            .context("Failed to parse AZURE_BLOB_CONNECTION_STRING")?;

        let max_request_bytes = parse_optional_u64("FIELDWISE_MAX_REQUEST_BYTES")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);

        Ok(Self {
            api_token,
            analysis: AnalysisClientConfig {
                endpoint,
                api_key,
                api_version,
                poll_interval: Duration::from_millis(poll_interval_ms),
            },
            default_model_id,
            blob_connection,
            max_request_bytes,
        })
    }
}

fn required(var: &str) -> Result<String> {
    optional(var)?.ok_or_else(|| anyhow!("{} is not configured", var))
}

fn optional(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("{} is not valid unicode", var)),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match optional(var)? {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        None => Ok(None),
    }
}
