// packages/engine/src/proxy/pool.rs
//! Proxy pool shared by all agents of a run
//!
//! Sticky acquisition blocks while every sticky endpoint is held; the
//! returned [`ProxySession`] gives its endpoint back when released or
//! dropped, waking exactly one waiter. Rotating acquisition never blocks.
//!
//! # Performance
//!
//! - Rotating pick: one atomic op (round robin) or one RNG draw (random)
//! - Sticky acquire/release: one short mutex section, no await under lock

use crate::proxy::backoff::{retry_with_backoff, BackoffPolicy, RequestFault};
use crate::proxy::endpoints::{partition, ProxyCredentials, ProxyEndpoint, RotatingSelector, StickySet};
use crate::utils::config::{ProxyConfig, RotationStrategy};
use crate::utils::errors::{EngineError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one request attempt is routed through
#[derive(Debug, Clone)]
pub struct ProxyAttempt {
    pub endpoint: ProxyEndpoint,

    /// Endpoint URL with credentials applied
    pub proxy_url: String,

    /// 0-based attempt number
    pub attempt: u32,
}

/// Exclusive hold on one sticky endpoint
pub struct ProxySession {
    endpoint: ProxyEndpoint,
    proxy_url: String,
    sticky: Arc<StickySet>,
    released: bool,
}

impl ProxySession {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    /// Endpoint URL with credentials applied
    pub fn proxy_url(&self) -> &str {
        &self.proxy_url
    }

    /// Give the endpoint back to the pool
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.sticky.release(&self.endpoint)
    }
}

impl std::fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySession")
            .field("endpoint", &self.endpoint)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ProxySession {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.sticky.release(&self.endpoint) {
                warn!("Failed to release sticky endpoint {} on drop: {}", self.endpoint, e);
            }
        }
    }
}

/// Proxy pool
pub struct ProxyPool {
    rotating: RotatingSelector,
    sticky: Arc<StickySet>,
    credentials: Option<ProxyCredentials>,
    policy: BackoffPolicy,
    request_timeout: Duration,
}

impl ProxyPool {
    /// Build a pool from explicit endpoint lists with default retry settings
    pub fn new(sticky: &[String], rotating: &[String]) -> Result<Self> {
        Self::from_config(&ProxyConfig {
            sticky: sticky.to_vec(),
            rotating: rotating.to_vec(),
            ..ProxyConfig::default()
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let (sticky, rotating) = partition(&config.sticky, &config.rotating)?;

        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(ProxyCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(EngineError::ConfigError(
                    "Proxy username and password must be set together".to_string(),
                ))
            }
        };

        info!(
            "Proxy pool initialized ({} sticky, {} rotating, {:?})",
            sticky.len(),
            rotating.len(),
            config.rotation
        );

        Ok(Self {
            rotating: RotatingSelector::new(rotating, config.rotation),
            sticky: Arc::new(StickySet::new(sticky)),
            credentials,
            policy: BackoffPolicy::from_config(config),
            request_timeout: config.request_timeout(),
        })
    }

    /// Replace the rotation strategy
    pub fn with_rotation(mut self, strategy: RotationStrategy) -> Self {
        self.rotating = RotatingSelector::new(self.rotating.endpoints().to_vec(), strategy);
        self
    }

    pub fn with_policy(mut self, policy: BackoffPolicy, request_timeout: Duration) -> Self {
        self.policy = policy;
        self.request_timeout = request_timeout;
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Proxy URL for an endpoint, with credentials applied
    pub fn full_endpoint(&self, endpoint: &ProxyEndpoint) -> String {
        endpoint.url(self.credentials.as_ref())
    }

    /// Pick a rotating endpoint; never blocks, carries no exclusivity
    pub fn acquire_rotating(&self) -> Result<ProxyEndpoint> {
        let endpoint = self.rotating.pick()?;
        debug!("Rotating endpoint {} selected", endpoint);
        Ok(endpoint)
    }

    /// Wait for a free sticky endpoint and hold it exclusively
    pub async fn acquire_sticky(&self) -> Result<ProxySession> {
        let endpoint = self.sticky.take().await?;
        debug!("Sticky endpoint {} acquired", endpoint);
        Ok(self.session(endpoint))
    }

    /// Take a free sticky endpoint if one exists right now
    pub fn try_acquire_sticky(&self) -> Result<Option<ProxySession>> {
        if self.sticky.is_empty() {
            return Err(EngineError::NoStickyEndpoints);
        }
        Ok(self.sticky.try_take().map(|e| self.session(e)))
    }

    /// Release a session; wakes one waiting acquirer
    pub fn release(&self, session: ProxySession) -> Result<()> {
        debug!("Releasing sticky endpoint {}", session.endpoint());
        session.release()
    }

    fn session(&self, endpoint: ProxyEndpoint) -> ProxySession {
        ProxySession {
            proxy_url: self.full_endpoint(&endpoint),
            endpoint,
            sticky: Arc::clone(&self.sticky),
            released: false,
        }
    }

    /// Send a request through `endpoint`, retrying transient faults with
    /// exponential backoff
    pub async fn execute<T, F, Fut>(&self, endpoint: &ProxyEndpoint, mut request: F) -> Result<T>
    where
        F: FnMut(ProxyAttempt) -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestFault>>,
    {
        let proxy_url = self.full_endpoint(endpoint);
        let label = endpoint.to_string();

        retry_with_backoff(&self.policy, self.request_timeout, &label, |attempt| {
            request(ProxyAttempt {
                endpoint: endpoint.clone(),
                proxy_url: proxy_url.clone(),
                attempt,
            })
        })
        .await
    }

    /// Like [`execute`](Self::execute), but every attempt goes through a
    /// freshly picked rotating endpoint
    pub async fn execute_rotating<T, F, Fut>(&self, mut request: F) -> Result<T>
    where
        F: FnMut(ProxyAttempt) -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestFault>>,
    {
        if self.rotating.is_empty() {
            return Err(EngineError::NoRotatingEndpoints);
        }

        retry_with_backoff(&self.policy, self.request_timeout, "rotating pool", |attempt| {
            let picked = self.rotating.pick();
            let routed = picked.map(|endpoint| ProxyAttempt {
                proxy_url: self.full_endpoint(&endpoint),
                endpoint,
                attempt,
            });
            let fut = routed.map(&mut request);
            async move {
                match fut {
                    Ok(fut) => fut.await,
                    Err(e) => Err(RequestFault::fatal(e.to_string())),
                }
            }
        })
        .await
    }

    pub fn stats(&self) -> PoolStats {
        let sticky_in_use = self.sticky.in_use();
        PoolStats {
            sticky_total: self.sticky.len(),
            sticky_in_use,
            sticky_available: self.sticky.len().saturating_sub(sticky_in_use),
            sticky_waiters: self.sticky.waiters(),
            rotating_total: self.rotating.len(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub sticky_total: usize,
    pub sticky_in_use: usize,
    pub sticky_available: usize,
    pub sticky_waiters: usize,
    pub rotating_total: usize,
}
