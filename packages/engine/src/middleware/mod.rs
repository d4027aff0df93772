// packages/engine/src/middleware/mod.rs
//! Response middleware
//!
//! ```text
//! agent request ──► response ──► GenericResponse
//!                                     │
//!                     MiddlewareManager::on_response
//!                       ├─ status_code
//!                       └─ ... (registered order)
//! ```

pub mod manager;
pub mod response;
pub mod status_code;

pub use manager::{MiddlewareError, MiddlewareManager, MiddlewareReport, ResponseMiddleware};
pub use response::{GenericResponse, RequestContext, StatusClass};
pub use status_code::StatusCodeMiddleware;
