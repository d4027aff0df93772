// packages/engine/src/middleware/manager.rs
//! Response middleware manager
//!
//! Runs every registered middleware, in registration order, against each
//! successful response. Middleware only observes: it cannot alter the
//! response or stop the chain. An error or panic inside one middleware is
//! logged and the next one still runs.

use crate::middleware::response::{GenericResponse, RequestContext};
use crate::middleware::status_code::StatusCodeMiddleware;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, trace};

/// Fault raised by a middleware
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

/// Observer invoked on every successful response
#[async_trait]
pub trait ResponseMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle_response(
        &self,
        response: &GenericResponse,
        ctx: &RequestContext,
    ) -> std::result::Result<(), MiddlewareError>;
}

/// What happened during one `on_response` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiddlewareReport {
    pub ran: usize,
    /// Names of middlewares that errored or panicked
    pub failed: Vec<String>,
}

impl MiddlewareReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered response middleware chain
#[derive(Clone, Default)]
pub struct MiddlewareManager {
    middlewares: Vec<Arc<dyn ResponseMiddleware>>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with the built-in status-code middleware
    pub fn with_defaults() -> Self {
        Self::new().with(Arc::new(StatusCodeMiddleware::new()))
    }

    pub fn with(mut self, middleware: Arc<dyn ResponseMiddleware>) -> Self {
        self.register(middleware);
        self
    }

    pub fn register(&mut self, middleware: Arc<dyn ResponseMiddleware>) {
        self.middlewares.push(middleware);
    }

    pub fn names(&self) -> Vec<String> {
        self.middlewares.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the chain against one response
    pub async fn on_response(&self, response: &GenericResponse, ctx: &RequestContext) -> MiddlewareReport {
        let mut report = MiddlewareReport::default();

        for middleware in &self.middlewares {
            let name = middleware.name();
            trace!("Running middleware {} for {}", name, ctx.agent_name);

            let outcome = AssertUnwindSafe(middleware.handle_response(response, ctx))
                .catch_unwind()
                .await;

            report.ran += 1;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Middleware {} failed for {} ({}): {}", name, ctx.agent_name, response.url, e);
                    report.failed.push(name.to_string());
                }
                Err(_) => {
                    error!("Middleware {} panicked for {} ({})", name, ctx.agent_name, response.url);
                    report.failed.push(name.to_string());
                }
            }
        }

        if !report.is_clean() {
            metrics::counter!("weaver_middleware_failures_total").increment(report.failed.len() as u64);
        }
        report
    }
}

impl std::fmt::Debug for MiddlewareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareManager")
            .field("middlewares", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentId;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ResponseMiddleware for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle_response(
            &self,
            response: &GenericResponse,
            _ctx: &RequestContext,
        ) -> std::result::Result<(), MiddlewareError> {
            self.log.lock().push(format!("{}:{}", self.name, response.status));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ResponseMiddleware for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle_response(
            &self,
            _response: &GenericResponse,
            _ctx: &RequestContext,
        ) -> std::result::Result<(), MiddlewareError> {
            Err(MiddlewareError("boom".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl ResponseMiddleware for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn handle_response(
            &self,
            _response: &GenericResponse,
            _ctx: &RequestContext,
        ) -> std::result::Result<(), MiddlewareError> {
            panic!("middleware bug");
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(AgentId(1), "eventseye", "https://example.com/a")
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let manager = MiddlewareManager::new()
            .with(Arc::new(Recording { name: "first", log: Arc::clone(&log) }))
            .with(Arc::new(Recording { name: "second", log: Arc::clone(&log) }));

        let report = manager.on_response(&GenericResponse::new("https://example.com/a", 200), &ctx()).await;

        assert!(report.is_clean());
        assert_eq!(report.ran, 2);
        assert_eq!(*log.lock(), vec!["first:200", "second:200"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let log = Arc::new(Mutex::new(vec![]));
        let manager = MiddlewareManager::new()
            .with(Arc::new(Failing))
            .with(Arc::new(Panicking))
            .with(Arc::new(Recording { name: "after", log: Arc::clone(&log) }));

        let report = manager.on_response(&GenericResponse::new("https://example.com/a", 500), &ctx()).await;

        assert_eq!(report.ran, 3);
        assert_eq!(report.failed, vec!["failing", "panicking"]);
        assert_eq!(*log.lock(), vec!["after:500"]);
    }

    #[test]
    fn test_defaults() {
        let manager = MiddlewareManager::with_defaults();
        assert_eq!(manager.names(), vec!["status_code"]);
    }
}
