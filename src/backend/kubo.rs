//! Kubo RPC backend
//!
//! Talks to a Kubo (go-ipfs) node over its HTTP RPC API. Only two commands
//! are used: `files/stat` to describe a node and `cat` with
//! `offset`/`length` to read a byte range.

use super::{Backend, NodeKind, NodeStat};
use crate::error::{GatewayError, Result};
use crate::models::{BackendPath, ByteRange};
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Characters escaped in RPC query arguments
const ARG: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Reply of `files/stat`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatReply {
    #[serde(default)]
    size: u64,
    #[serde(rename = "Type", default)]
    node_type: String,
    #[serde(default)]
    mtime: Option<i64>,
    #[serde(default)]
    mtime_nsecs: Option<u32>,
}

/// Error body returned by Kubo for failed commands
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorReply {
    message: String,
}

/// Backend backed by a Kubo node's RPC API
pub struct KuboBackend {
    client: Client,
    api_base: String,
}

impl KuboBackend {
    /// Create a client for the RPC API at `api_base` (e.g. `http://127.0.0.1:5001`)
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(KuboBackend {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client whose requests also carry a transport-level timeout
    pub fn with_timeout(api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(KuboBackend {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn command_url(&self, command: &str, path: &BackendPath, extra: &[(&str, u64)]) -> String {
        let mut url = format!(
            "{}/api/v0/{}?arg={}",
            self.api_base,
            command,
            utf8_percent_encode(path.as_str(), ARG)
        );
        for (name, value) in extra {
            url.push_str(&format!("&{}={}", name, value));
        }
        url
    }

    /// Send an RPC command (Kubo only accepts POST) and check the status
    async fn call(&self, url: &str, path: &BackendPath) -> Result<Response> {
        debug!("Kubo RPC call url={}", url);

        let response = self.client.post(url).send().await.map_err(|e| {
            warn!("Kubo RPC request failed for path={}: {}", path, e);
            GatewayError::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<ErrorReply>(&body) {
            // Kubo reports missing links, unknown CIDs and bad paths as command errors
            Ok(reply) if status.is_server_error() || status.is_client_error() => {
                debug!("Kubo reported error for path={}: {}", path, reply.message);
                Err(GatewayError::NotFound(format!("{}: {}", path, reply.message)))
            }
            _ => {
                warn!("Unexpected Kubo RPC status for path={}: {}", path, status);
                Err(GatewayError::Backend(format!(
                    "unexpected status {} from Kubo RPC",
                    status
                )))
            }
        }
    }
}

fn to_system_time(secs: Option<i64>, nanos: Option<u32>) -> Option<SystemTime> {
    let secs = u64::try_from(secs?).ok()?;
    if secs == 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::new(secs, nanos.unwrap_or(0).min(999_999_999)))
}

#[async_trait]
impl Backend for KuboBackend {
    async fn stat(&self, path: &BackendPath) -> Result<NodeStat> {
        let url = self.command_url("files/stat", path, &[]);
        let response = self.call(&url, path).await?;
        let body = response.bytes().await?;

        let reply: StatReply = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::Backend(format!("invalid files/stat reply for {}: {}", path, e))
        })?;

        let kind = match reply.node_type.as_str() {
            "file" => NodeKind::File,
            "directory" => NodeKind::Directory,
            _ => NodeKind::Other,
        };

        Ok(NodeStat {
            kind,
            size: reply.size,
            modified: to_system_time(reply.mtime, reply.mtime_nsecs),
        })
    }

    async fn read(&self, path: &BackendPath, range: ByteRange) -> Result<Bytes> {
        let url = self.command_url(
            "cat",
            path,
            &[("offset", range.start), ("length", range.size())],
        );
        let response = self.call(&url, path).await?;
        Ok(response.bytes().await?)
    }
}
