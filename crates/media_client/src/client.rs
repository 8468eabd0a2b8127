//! Repository media HTTP client.
//!
//! Blocking reqwest client (no Tokio runtime required). One request per
//! call; the verifier owns retry and backoff.

use std::time::Duration;

use log::debug;
use speclink_linkage::config::VerificationConfig;
use speclink_linkage::{MediaClient, MediaFailure, VoxelSpacing};

use crate::response::extract_voxel_spacing;

pub const USER_AGENT: &str = concat!("speclink/", env!("CARGO_PKG_VERSION"));

/// Media API client (blocking).
#[derive(Clone)]
pub struct HttpMediaClient {
    http: reqwest::blocking::Client,
    api_base: String,
    api_key: Option<String>,
}

impl HttpMediaClient {
    /// Client for the configured API base and timeout.
    pub fn new(api_key: Option<String>, config: &VerificationConfig) -> Self {
        Self::with_base_url(
            api_key,
            config.api_base.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_base_url(api_key: Option<String>, api_base: String, timeout: Duration) -> Self {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn media_url(&self, media_id: &str) -> String {
        format!("{}/media/{}", self.api_base, media_id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Map a non-success HTTP status to a failure class.
pub fn classify_status(status: u16, retry_after_secs: Option<u64>) -> MediaFailure {
    match status {
        401 | 403 => MediaFailure::Unauthorized,
        404 => MediaFailure::NotFound,
        429 => MediaFailure::RateLimited { retry_after_secs },
        500..=599 => MediaFailure::Upstream { status },
        _ => MediaFailure::Rejected { status },
    }
}

impl MediaClient for HttpMediaClient {
    fn fetch_voxel_spacing(&self, media_id: &str) -> Result<VoxelSpacing, MediaFailure> {
        let url = self.media_url(media_id);
        let mut req = self.http.get(&url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().map_err(|e| MediaFailure::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        debug!("GET {url} -> {status}");

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(classify_status(status, retry_after));
        }

        // Read as text first: some gateways prefix a BOM
        let text = resp
            .text()
            .map_err(|e| MediaFailure::Network(e.to_string()))?;
        let trimmed = text.trim_start_matches('\u{feff}');
        let doc: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
            MediaFailure::Malformed(format!(
                "{e} (body: {})",
                trimmed.chars().take(200).collect::<String>()
            ))
        })?;

        extract_voxel_spacing(&doc)
    }
}
