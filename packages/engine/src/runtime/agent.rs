// packages/engine/src/runtime/agent.rs
//! Agent contract
//!
//! Extraction logic lives outside the engine. For each agent of a run the
//! launcher asks the registered [`AgentFactory`] for a [`RecordStream`]: a
//! lazy, finite, non-restartable sequence of raw records, pulled one item
//! at a time.
//!
//! The [`AgentContext`] handed to the factory carries everything extraction
//! logic may touch: run parameters, the proxy pool, the response middleware
//! chain, and the stop signals it should observe between requests.

use crate::middleware::{GenericResponse, MiddlewareManager, MiddlewareReport, RequestContext};
use crate::proxy::ProxyPool;
use crate::registry::{AgentId, AgentState, AgentStateHandle, JobId, RunParameters};
use crate::runtime::channel::RawRecord;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use futures::stream::BoxStream;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Unhandled fault raised by extraction logic
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct ExtractionFault {
    /// Short classification, e.g. `parse`, `request`
    pub kind: String,
    pub detail: String,
}

impl ExtractionFault {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

impl From<EngineError> for ExtractionFault {
    fn from(err: EngineError) -> Self {
        let kind = match &err {
            EngineError::RetryCeilingExceeded { .. } | EngineError::RequestFailed(_) => "request",
            EngineError::NoStickyEndpoints | EngineError::NoRotatingEndpoints => "proxy",
            _ => "engine",
        };
        Self::new(kind, err.to_string())
    }
}

/// An agent's output
pub type RecordStream = BoxStream<'static, std::result::Result<RawRecord, ExtractionFault>>;

/// Builds the record stream for one agent of one run
pub trait AgentFactory: Send + Sync {
    fn create(&self, ctx: AgentContext) -> std::result::Result<RecordStream, ExtractionFault>;
}

impl<F> AgentFactory for F
where
    F: Fn(AgentContext) -> std::result::Result<RecordStream, ExtractionFault> + Send + Sync,
{
    fn create(&self, ctx: AgentContext) -> std::result::Result<RecordStream, ExtractionFault> {
        self(ctx)
    }
}

/// Agent name → extraction logic
#[derive(Default)]
pub struct AgentCatalog {
    factories: DashMap<String, Arc<dyn AgentFactory>>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, factory: Arc<dyn AgentFactory>) {
        let name = name.into();
        debug!("Registered extractor for agent '{}'", name);
        self.factories.insert(name, factory);
    }

    pub fn with(self, name: impl Into<String>, factory: Arc<dyn AgentFactory>) -> Self {
        self.register(name, factory);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AgentFactory>> {
        self.factories
            .get(name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| EngineError::ExtractorNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Everything one agent task may use during a run
#[derive(Clone)]
pub struct AgentContext {
    pub agent: AgentId,
    pub name: String,
    pub target: String,
    pub job: JobId,
    pub params: RunParameters,
    state: AgentStateHandle,
    shutdown: CancellationToken,
    proxy: Option<Arc<ProxyPool>>,
    middleware: MiddlewareManager,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: AgentId,
        name: impl Into<String>,
        target: impl Into<String>,
        job: JobId,
        params: RunParameters,
        state: AgentStateHandle,
        shutdown: CancellationToken,
        proxy: Option<Arc<ProxyPool>>,
        middleware: MiddlewareManager,
    ) -> Self {
        Self {
            agent,
            name: name.into(),
            target: target.into(),
            job,
            params,
            state,
            shutdown,
            proxy,
            middleware,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state.state()
    }

    /// Whether the agent should keep producing: still RUNNING and the run
    /// has not been asked to shut down
    pub fn should_continue(&self) -> bool {
        self.state.is_running() && !self.shutdown.is_cancelled()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Proxy pool of the run; errors when proxies are disabled
    pub fn proxy(&self) -> Result<&Arc<ProxyPool>> {
        self.proxy
            .as_ref()
            .ok_or_else(|| EngineError::ConfigError("Proxies are disabled for this run".to_string()))
    }

    pub fn middleware(&self) -> &MiddlewareManager {
        &self.middleware
    }

    /// Request context for a URL fetched by this agent
    pub fn request_context(&self, url: impl Into<String>) -> RequestContext {
        RequestContext::new(self.agent, self.name.clone(), url)
    }

    /// Pass a successful response through the middleware chain
    pub async fn on_response(&self, response: &GenericResponse, ctx: &RequestContext) -> MiddlewareReport {
        self.middleware.on_response(response, ctx).await
    }

    /// Sleep a random duration in `[min, max]` between requests
    pub async fn jitter(&self, min: Duration, max: Duration) {
        let delay = if max <= min {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        tokio::time::sleep(delay).await;
    }

    /// Log in the agent's name
    pub fn log(&self, msg: &str) {
        info!("[{}] {}", self.name, msg);
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent", &self.agent)
            .field("name", &self.name)
            .field("job", &self.job)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentDescriptor, InMemoryJobStore, JobStore, PlannedAgent, RunPlan, SharedRegistry};
    use futures::StreamExt;

    async fn context() -> (Arc<SharedRegistry>, AgentContext, CancellationToken) {
        let store = InMemoryJobStore::new();
        let job = store.create_job(None).await.unwrap();
        let job_id = job.id;
        let registry = Arc::new(SharedRegistry::new());
        registry
            .build(
                RunPlan {
                    job,
                    grouping: None,
                    agents: vec![PlannedAgent {
                        descriptor: AgentDescriptor::new(1, "eventseye", "eventseye.com"),
                        params: [("page", "1")].into_iter().collect(),
                    }],
                },
                &store,
            )
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let ctx = AgentContext::new(
            AgentId(1),
            "eventseye",
            "eventseye.com",
            job_id,
            registry.params(AgentId(1)).unwrap(),
            registry.state_handle(AgentId(1)).unwrap(),
            shutdown.clone(),
            None,
            MiddlewareManager::new(),
        );
        (registry, ctx, shutdown)
    }

    #[tokio::test]
    async fn test_should_continue_follows_state() {
        let (registry, ctx, _) = context().await;
        assert!(ctx.should_continue());

        registry.set_state(AgentId(1), AgentState::Error).unwrap();
        assert!(!ctx.should_continue());
        assert_eq!(ctx.state(), AgentState::Error);
    }

    #[tokio::test]
    async fn test_should_continue_follows_shutdown() {
        let (_registry, ctx, shutdown) = context().await;
        shutdown.cancel();
        assert!(!ctx.should_continue());
    }

    #[tokio::test]
    async fn test_proxy_disabled() {
        let (_registry, ctx, _) = context().await;
        assert!(matches!(ctx.proxy(), Err(EngineError::ConfigError(_))));
        assert_eq!(ctx.params.get("page"), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_within_range() {
        let (_registry, ctx, _) = context().await;
        let started = tokio::time::Instant::now();
        ctx.jitter(Duration::from_millis(100), Duration::from_millis(300)).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(310));
    }

    #[tokio::test]
    async fn test_catalog_resolves_closures() {
        let catalog = AgentCatalog::new();
        let factory = |_ctx: AgentContext| -> std::result::Result<RecordStream, ExtractionFault> {
            Ok(futures::stream::empty().boxed())
        };
        catalog.register("eventseye", Arc::new(factory));

        assert!(catalog.contains("eventseye"));
        assert!(matches!(catalog.resolve("unknown"), Err(EngineError::ExtractorNotFound(_))));

        let (_registry, ctx, _) = context().await;
        let mut stream = catalog.resolve("eventseye").unwrap().create(ctx).unwrap();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_fault_from_engine_error() {
        let fault = ExtractionFault::from(EngineError::RetryCeilingExceeded {
            attempts: 3,
            last_error: "reset".into(),
        });
        assert_eq!(fault.kind, "request");
    }
}
