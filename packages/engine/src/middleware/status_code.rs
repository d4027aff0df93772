// packages/engine/src/middleware/status_code.rs
//! Status-code middleware: warns on 4xx/5xx responses, counts responses by
//! status class.

use crate::middleware::manager::{MiddlewareError, ResponseMiddleware};
use crate::middleware::response::{GenericResponse, RequestContext, StatusClass};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct StatusCodeMiddleware {
    counts: DashMap<StatusClass, u64>,
}

impl StatusCodeMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses seen so far in a class
    pub fn count(&self, class: StatusClass) -> u64 {
        self.counts.get(&class).map_or(0, |c| *c)
    }
}

#[async_trait]
impl ResponseMiddleware for StatusCodeMiddleware {
    fn name(&self) -> &str {
        "status_code"
    }

    async fn handle_response(
        &self,
        response: &GenericResponse,
        ctx: &RequestContext,
    ) -> std::result::Result<(), MiddlewareError> {
        let class = response.status_class();
        *self.counts.entry(class).or_insert(0) += 1;
        metrics::counter!("weaver_responses_total", "class" => class.as_str()).increment(1);

        match class {
            StatusClass::ClientError | StatusClass::ServerError => {
                let via = ctx.proxy.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "direct".into());
                warn!(
                    "[{}] {} returned {} (via {}, attempt {})",
                    ctx.agent_name, response.url, response.status, via, ctx.attempt
                );
            }
            StatusClass::Unknown => {
                warn!("[{}] {} returned unexpected status {}", ctx.agent_name, response.url, response.status);
            }
            _ => debug!("[{}] {} returned {}", ctx.agent_name, response.url, response.status),
        }

        Ok(())
    }
}
