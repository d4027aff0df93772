// packages/engine/src/middleware/response.rs
//! Normalized response representation
//!
//! Whatever client an agent uses, its responses are converted to a
//! [`GenericResponse`] before middleware sees them.

use crate::proxy::ProxyEndpoint;
use crate::registry::AgentId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// HTTP status class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            100..=199 => Self::Informational,
            200..=299 => Self::Success,
            300..=399 => Self::Redirection,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "1xx",
            Self::Success => "2xx",
            Self::Redirection => "3xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
            Self::Unknown => "other",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response in the form middleware operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericResponse {
    pub url: String,
    pub status: u16,

    /// Header names lowercased
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
}

impl GenericResponse {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_status(self.status)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status_class(), StatusClass::ClientError | StatusClass::ServerError)
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

/// Who made the request and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub agent: AgentId,
    pub agent_name: String,
    pub url: String,

    /// Endpoint the request went through, if proxied
    pub proxy: Option<ProxyEndpoint>,

    /// 0-based attempt number
    pub attempt: u32,
}

impl RequestContext {
    pub fn new(agent: AgentId, agent_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            agent,
            agent_name: agent_name.into(),
            url: url.into(),
            proxy: None,
            attempt: 0,
        }
    }

    pub fn via(mut self, proxy: ProxyEndpoint) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}
