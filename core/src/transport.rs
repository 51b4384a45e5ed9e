//! HTTP transport collaborator
//!
//! Every device and platform call goes through [`Transport`]. Implementations
//! return `Ok` for any HTTP response, whatever its status; only connection-level
//! failures become `Err`. Status handling belongs to the caller
//! (see [`TransportResponse::error_for_status`]).

use crate::{LametricError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Raw response: status code plus body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into `DeviceError{status, body}`
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LametricError::DeviceError {
                status: self.status,
                body: self.body,
            })
        }
    }

    /// Parse the body as JSON. Some endpoints answer with an empty body on success.
    pub fn json(&self) -> Result<Option<Value>> {
        if self.body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.body)?))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse>;
}

/// Credentials attached to each request
#[derive(Clone)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

/// Configuration for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub timeout_ms: u64,
    /// The device serves a self-signed certificate on :4343, so this is usually false for it
    pub verify_ssl: bool,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            verify_ssl: false,
            user_agent: "lametric-bridge/0.1".to_string(),
        }
    }
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    auth: Auth,
}

impl HttpTransport {
    pub fn new(auth: Auth, config: HttpTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| LametricError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self { client, auth })
    }

    /// Device API v2 transport: Basic auth with the fixed `dev` user
    pub fn for_device(api_key: &str, verify_ssl: bool) -> Result<Self> {
        Self::new(
            Auth::Basic {
                username: "dev".to_string(),
                password: api_key.to_string(),
            },
            HttpTransportConfig {
                verify_ssl,
                ..Default::default()
            },
        )
    }

    /// Home Assistant REST transport: long-lived access token
    pub fn for_home_assistant(token: &str, verify_ssl: bool) -> Result<Self> {
        Self::new(
            Auth::Bearer(token.to_string()),
            HttpTransportConfig {
                verify_ssl,
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse> {
        debug!(target: "transport", method = %method, url = %url, "HTTP request");

        let mut req = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        }
        .header(reqwest::header::ACCEPT, "application/json");

        req = match &self.auth {
            Auth::None => req,
            Auth::Basic { username, password } => req.basic_auth(username, Some(password)),
            Auth::Bearer(token) => req.bearer_auth(token),
        };
        if let Some(json) = body {
            req = req.json(&json);
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(target: "transport", status = status, bytes = body.len(), "HTTP response");
        Ok(TransportResponse { status, body })
    }
}
