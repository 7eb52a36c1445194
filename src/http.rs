//! Transport layer for the Gizwits cloud API.
//!
//! - Blocking client using `ureq` (no async).
//! - Non-2xx statuses come back as responses; only the caller gives them meaning.
//! - Every logged body and header goes through `crate::redact` first.

use http::{Method, StatusCode};
use log::{debug, trace};
use serde_json::Value;
use std::time::Duration;

use crate::redact::{redact_json, render_headers};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connection(String),
    Timeout(String),
    MalformedBody(String),
    UnsupportedMethod(Method),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Connection(s) => write!(f, "connection failed: {}", s),
            TransportError::Timeout(s) => write!(f, "request timed out: {}", s),
            TransportError::MalformedBody(s) => write!(f, "malformed response body: {}", s),
            TransportError::UnsupportedMethod(m) => write!(f, "unsupported method {}", m),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::GET,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        ApiRequest {
            method: Method::POST,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        ApiResponse { status, body }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// One request/response exchange with the cloud.
pub trait Transport {
    fn request(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn request(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        (**self).request(request)
    }
}

/// Empty bodies parse to `Null`; anything else must be JSON.
pub fn parse_body(raw: &str) -> Result<Value, TransportError> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(raw).map_err(|e| TransportError::MalformedBody(e.to_string()))
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(t) => TransportError::Timeout(t.to_string()),
        other => TransportError::Connection(other.to_string()),
    }
}

pub struct HttpClient {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        HttpClient {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn execute(&self, request: &ApiRequest) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let url = self.url(&request.path);
        if request.method == Method::GET {
            let mut req = self.agent.get(&url);
            for (k, v) in &request.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            req.call().map_err(map_ureq_error)
        } else if request.method == Method::POST {
            let mut req = self.agent.post(&url);
            for (k, v) in &request.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            match &request.body {
                Some(body) => {
                    let bytes = serde_json::to_vec(body)
                        .map_err(|e| TransportError::MalformedBody(format!("request body: {}", e)))?;
                    req.header("Content-Type", "application/json")
                        .send(&bytes[..])
                        .map_err(map_ureq_error)
                }
                None => req.send_empty().map_err(map_ureq_error),
            }
        } else {
            Err(TransportError::UnsupportedMethod(request.method.clone()))
        }
    }
}

impl Transport for HttpClient {
    fn request(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        debug!(
            "--> {} {} [{}] {}",
            request.method,
            request.path,
            render_headers(&request.headers),
            request
                .body
                .as_ref()
                .map(|b| redact_json(b).to_string())
                .unwrap_or_default()
        );

        let mut response = self.execute(request)?;
        let status = response.status();
        let raw = response
            .body_mut()
            .read_to_string()
            .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
        let body = parse_body(&raw)?;

        debug!("<-- {} {} {}", request.method, request.path, status.as_u16());
        trace!("<-- body {}", redact_json(&body));

        Ok(ApiResponse { status, body })
    }
}
