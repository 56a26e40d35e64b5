//! NAT-traversal credential cache
//!
//! TURN credentials come from an external HTTP service. The list is fetched
//! on startup and refreshed in the background once it is older than the
//! freshness window. A failed fetch is logged and the previous list stays in
//! service; clients never see the failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use tether_core::{IceConfig, IceServer};

use crate::error::CredentialError;

/// Minimum spacing between attempts after a failed fetch
pub const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(60);

/// Source of ICE server descriptors
#[async_trait::async_trait]
pub trait IceProvider: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServer>, CredentialError>;

    /// Name of this provider for logging
    fn name(&self) -> &str;
}

/// Credential services answer with a bare list or a wrapped one
#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialResponse {
    List(Vec<IceServer>),
    Wrapped {
        #[serde(rename = "iceServers")]
        ice_servers: Vec<IceServer>,
    },
}

impl CredentialResponse {
    fn into_servers(self) -> Vec<IceServer> {
        match self {
            CredentialResponse::List(servers) => servers,
            CredentialResponse::Wrapped { ice_servers } => ice_servers,
        }
    }
}

/// Fetches descriptors with a plain GET
pub struct HttpIceProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpIceProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CredentialError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent(format!("tether-signal/{}", env!("CARGO_PKG_VERSION")))
                .timeout(timeout)
                .build()?,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl IceProvider for HttpIceProvider {
    async fn fetch(&self) -> Result<Vec<IceServer>, CredentialError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(CredentialError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let parsed: CredentialResponse = serde_json::from_str(&body)?;
        Ok(parsed.into_servers())
    }

    fn name(&self) -> &str {
        &self.url
    }
}

struct CacheState {
    servers: Vec<IceServer>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
}

/// Cached ICE server list handed to registering clients
pub struct IceCache {
    provider: Option<Arc<dyn IceProvider>>,
    state: RwLock<CacheState>,
    max_age: Duration,
    refreshing: AtomicBool,
}

impl IceCache {
    pub fn new(
        provider: Option<Arc<dyn IceProvider>>,
        fallback: Vec<IceServer>,
        max_age: Duration,
    ) -> Self {
        Self {
            provider,
            state: RwLock::new(CacheState {
                servers: fallback,
                fetched_at: None,
                attempted_at: None,
            }),
            max_age,
            refreshing: AtomicBool::new(false),
        }
    }

    /// A cache that only ever serves `servers`
    pub fn fixed(servers: Vec<IceServer>) -> Self {
        Self::new(None, servers, Duration::MAX)
    }

    pub fn from_config(config: &IceConfig) -> Result<Self, CredentialError> {
        let provider: Option<Arc<dyn IceProvider>> = match &config.credentials_url {
            Some(url) => Some(Arc::new(HttpIceProvider::new(
                url.clone(),
                config.request_timeout(),
            )?)),
            None => None,
        };
        Ok(Self::new(
            provider,
            config.fallback.clone(),
            config.refresh_interval(),
        ))
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Fetch now. On failure the current list is kept.
    pub async fn refresh(&self) -> Result<usize, CredentialError> {
        let provider = self.provider.as_ref().ok_or(CredentialError::NotConfigured)?;
        self.state.write().attempted_at = Some(Instant::now());

        match provider.fetch().await {
            Ok(servers) => {
                let count = servers.len();
                let mut state = self.state.write();
                state.servers = servers;
                state.fetched_at = Some(Instant::now());
                // Backoff only applies after a failure
                state.attempted_at = None;
                info!("Fetched {} ICE servers from {}", count, provider.name());
                Ok(count)
            }
            Err(e) => {
                warn!(
                    "ICE credential fetch from {} failed, keeping cached list: {}",
                    provider.name(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Whether a background refresh is due
    pub fn is_stale(&self) -> bool {
        if self.provider.is_none() {
            return false;
        }
        let state = self.state.read();
        match state.fetched_at {
            Some(at) if at.elapsed() < self.max_age => false,
            _ => state
                .attempted_at
                .map_or(true, |at| at.elapsed() >= RETRY_AFTER_FAILURE),
        }
    }

    /// Current list without triggering a refresh
    pub fn snapshot(&self) -> Vec<IceServer> {
        self.state.read().servers.clone()
    }

    /// Current list; kicks off a background refresh when stale.
    /// Must be called from within a tokio runtime.
    pub fn servers(self: &Arc<Self>) -> Vec<IceServer> {
        if self.is_stale() && !self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("ICE server cache is stale, refreshing");
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                let _ = cache.refresh().await;
                cache.refreshing.store(false, Ordering::Release);
            });
        }
        self.snapshot()
    }
}
