//! # Consul KV Client
//!
//! [`RemoteStore`] over Consul's `/v1/kv` HTTP API.
//!
//! ## Request Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  list    GET    /v1/kv/<prefix>?recurse                                 │
//! │  watch   GET    /v1/kv/<prefix>?recurse&index=<since>&wait=<max_wait>   │
//! │  put     PUT    /v1/kv/<key>            body = raw value bytes          │
//! │  delete  DELETE /v1/kv/<key>[?recurse]                                  │
//! │                                                                         │
//! │  index   X-Consul-Index response header                                 │
//! │  values  base64 in the JSON body, `null` for an empty value             │
//! │  404     no keys under the prefix (index header still present)          │
//! │  writes  body is `true` on success                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A recursive blocking query answers with the whole subtree once anything
//! in it moves. The client narrows that down to keys modified after
//! `since` so callers only see changes.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kvmirror_core::{ClockValue, RemoteEntry, RemoteListing};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use super::RemoteStore;
use crate::config::ConsulSettings;
use crate::error::{MirrorError, MirrorResult};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Grace period added on top of the server-side wait before the HTTP
/// request itself is abandoned.
const WATCH_GRACE: Duration = Duration::from_secs(5);

/// One element of a KV listing, as Consul encodes it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    create_index: u64,
    #[serde(default)]
    modify_index: u64,
    #[serde(default)]
    flags: u64,
}

impl KvPair {
    fn into_entry(self) -> MirrorResult<RemoteEntry> {
        let value = match self.value {
            Some(encoded) => STANDARD.decode(encoded)?,
            None => Vec::new(),
        };

        Ok(RemoteEntry {
            key: self.key,
            value,
            create_index: self.create_index,
            modify_index: self.modify_index,
            flags: self.flags,
        })
    }
}

/// HTTP client for one Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: Client,
    base: Url,
    token: Option<String>,
    datacenter: Option<String>,
    request_timeout: Duration,
}

impl ConsulClient {
    /// Creates a client from connection settings.
    pub fn new(settings: &ConsulSettings) -> MirrorResult<Self> {
        let base = Url::parse(&settings.address)?;
        if base.cannot_be_a_base() {
            return Err(MirrorError::InvalidUrl(settings.address.clone()));
        }

        // No client-wide timeout: watches need a longer bound than writes.
        let http = Client::builder()
            .connect_timeout(settings.request_timeout())
            .build()?;

        Ok(ConsulClient {
            http,
            base,
            token: settings.token.clone(),
            datacenter: settings.datacenter.clone(),
            request_timeout: settings.request_timeout(),
        })
    }

    /// The agent URL this client talks to.
    pub fn address(&self) -> &Url {
        &self.base
    }

    // =========================================================================
    // Request Building
    // =========================================================================

    fn kv_url(&self, key: &str) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}/v1/kv/{}", self.base.path().trim_end_matches('/'), key);
        url.set_path(&path);
        if let Some(dc) = &self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn read(&self, url: Url, timeout: Duration) -> MirrorResult<RemoteListing> {
        let response = self
            .authorize(self.http.get(url))
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::Transport(format!(
                "Consul read failed ({}): {}",
                status,
                body.trim()
            )));
        }

        let index = parse_index(&response)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(RemoteListing::empty(index));
        }

        let body = response.bytes().await?;
        let pairs: Vec<KvPair> = serde_json::from_slice(&body)?;
        let entries = pairs
            .into_iter()
            .map(KvPair::into_entry)
            .collect::<MirrorResult<Vec<_>>>()?;

        Ok(RemoteListing::new(entries, index))
    }

    async fn write(&self, key: &str, request: RequestBuilder) -> MirrorResult<()> {
        let response = self
            .authorize(request)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(MirrorError::RemoteWrite {
                key: key.to_string(),
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }

        if body.trim() != "true" {
            return Err(MirrorError::RemoteWrite {
                key: key.to_string(),
                status: status.as_u16(),
                message: format!("store did not confirm the write: {}", body.trim()),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteStore for ConsulClient {
    async fn list(&self, prefix: &str) -> MirrorResult<RemoteListing> {
        let mut url = self.kv_url(prefix);
        url.query_pairs_mut().append_key_only("recurse");

        let listing = self.read(url, self.request_timeout).await?;
        debug!(prefix, index = listing.index, keys = listing.entries.len(), "Consul list");
        Ok(listing)
    }

    async fn watch(
        &self,
        prefix: &str,
        since: ClockValue,
        max_wait: Duration,
    ) -> MirrorResult<RemoteListing> {
        let mut url = self.kv_url(prefix);
        url.query_pairs_mut()
            .append_key_only("recurse")
            .append_pair("index", &since.to_string())
            .append_pair("wait", &wait_param(max_wait));

        let mut listing = self.read(url, watch_timeout(max_wait)).await?;

        let total = listing.entries.len();
        listing.entries.retain(|e| e.modify_index > since);
        trace!(
            prefix,
            since,
            index = listing.index,
            total,
            changed = listing.entries.len(),
            "Consul watch returned"
        );

        Ok(listing)
    }

    async fn put(&self, key: &str, value: &[u8]) -> MirrorResult<()> {
        let request = self.http.put(self.kv_url(key)).body(value.to_vec());
        self.write(key, request).await
    }

    async fn delete(&self, key: &str, recursive: bool) -> MirrorResult<()> {
        let mut url = self.kv_url(key);
        if recursive {
            url.query_pairs_mut().append_key_only("recurse");
        }
        self.write(key, self.http.delete(url)).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_index(response: &Response) -> MirrorResult<ClockValue> {
    let header = response
        .headers()
        .get(INDEX_HEADER)
        .ok_or_else(|| MirrorError::Decode(format!("missing {} header", INDEX_HEADER)))?;

    header
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<ClockValue>().ok())
        .ok_or_else(|| {
            MirrorError::Decode(format!("invalid {} header: {:?}", INDEX_HEADER, header))
        })
}

/// Formats a wait bound the way Consul parses durations.
fn wait_param(max_wait: Duration) -> String {
    if max_wait.subsec_millis() == 0 {
        format!("{}s", max_wait.as_secs())
    } else {
        format!("{}ms", max_wait.as_millis())
    }
}

/// HTTP timeout for a watch. Consul adds up to `wait / 16` of jitter to
/// the server-side wait.
fn watch_timeout(max_wait: Duration) -> Duration {
    max_wait + max_wait / 16 + WATCH_GRACE
}
