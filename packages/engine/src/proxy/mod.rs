// packages/engine/src/proxy/mod.rs
//! Egress proxy coordination
//!
//! # Architecture
//!
//! ```text
//! ProxyPool
//! ├─ Rotating: [E1, E2, ...]   pick-any, non-blocking, shared
//! ├─ Sticky:   [E3, E4, ...]   exclusive, held through a ProxySession
//! │    ├─ in_use: {E3}          (mutex-guarded)
//! │    └─ released: Notify      (wake-one on release)
//! └─ Backoff: base * 2^n, raise past max_wait
//! ```
//!
//! The two sets are disjoint; an address configured in both is rejected.

pub mod backoff;
pub mod endpoints;
pub mod pool;

pub use backoff::{retry_with_backoff, BackoffPolicy, RequestFault};
pub use endpoints::{ProxyCredentials, ProxyEndpoint};
pub use pool::{PoolStats, ProxyAttempt, ProxyPool, ProxySession};
