//! Capability map built from the device's self-described endpoint directory
//!
//! `GET <base>/api/v2` answers with
//! `{"api_version": "2.x", "endpoints": {"notifications_url": "...", ...}}`.
//! Only the operations enumerated in [`Operation`] are kept; a key the device
//! does not list means the firmware does not support that operation.

use crate::transport::{Method, Transport};
use crate::{LametricError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Closed set of device operations this bridge knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Device,
    Notifications,
    CurrentNotification,
    ConcreteNotification,
    AppsList,
    AppsSwitchNext,
    AppsSwitchPrev,
    Display,
    Audio,
    Bluetooth,
    Wifi,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::Device,
        Operation::Notifications,
        Operation::CurrentNotification,
        Operation::ConcreteNotification,
        Operation::AppsList,
        Operation::AppsSwitchNext,
        Operation::AppsSwitchPrev,
        Operation::Display,
        Operation::Audio,
        Operation::Bluetooth,
        Operation::Wifi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Device => "device",
            Operation::Notifications => "notifications",
            Operation::CurrentNotification => "current_notification",
            Operation::ConcreteNotification => "concrete_notification",
            Operation::AppsList => "apps_list",
            Operation::AppsSwitchNext => "apps_switch_next",
            Operation::AppsSwitchPrev => "apps_switch_prev",
            Operation::Display => "display",
            Operation::Audio => "audio",
            Operation::Bluetooth => "bluetooth",
            Operation::Wifi => "wifi",
        }
    }

    /// Key used in the device directory document
    pub fn directory_key(&self) -> String {
        format!("{}_url", self.name())
    }

    /// Accepts both the bare name and the `_url` directory key
    pub fn from_key(key: &str) -> Option<Self> {
        let name = key.strip_suffix("_url").unwrap_or(key);
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = LametricError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_key(s)
            .ok_or_else(|| LametricError::InvalidRequest(format!("Unknown operation: {}", s)))
    }
}

/// Operation → absolute endpoint URL, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMap {
    base_url: String,
    api_version: Option<String>,
    endpoints: HashMap<Operation, String>,
}

impl CapabilityMap {
    /// Build from a directory document fetched from `base_url`
    pub fn from_document(base_url: &str, doc: &Value) -> Result<Self> {
        let obj = doc.as_object().ok_or_else(|| {
            LametricError::DiscoveryError("directory document is not a JSON object".to_string())
        })?;
        let raw = obj
            .get("endpoints")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                LametricError::DiscoveryError(
                    "directory document has no 'endpoints' object".to_string(),
                )
            })?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let mut endpoints = HashMap::new();
        for (key, value) in raw {
            let Some(url) = value.as_str() else {
                debug!(target: "capability", key = %key, "Skipping non-string endpoint");
                continue;
            };
            match Operation::from_key(key) {
                Some(op) => {
                    // Some firmwares report paths instead of full URLs
                    let url = if url.starts_with('/') {
                        format!("{}{}", base_url, url)
                    } else {
                        url.to_string()
                    };
                    endpoints.insert(op, url);
                }
                None => debug!(target: "capability", key = %key, "Ignoring unknown endpoint"),
            }
        }

        Ok(Self {
            base_url,
            api_version: obj
                .get("api_version")
                .and_then(Value::as_str)
                .map(str::to_string),
            endpoints,
        })
    }

    /// Build directly from known endpoints
    pub fn from_endpoints(
        base_url: impl Into<String>,
        endpoints: impl IntoIterator<Item = (Operation, String)>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_version: None,
            endpoints: endpoints.into_iter().collect(),
        }
    }

    /// Endpoint URL for `op`, or `UnsupportedCapability` if the firmware did not advertise it
    pub fn lookup(&self, op: Operation) -> Result<&str> {
        self.endpoints
            .get(&op)
            .map(String::as_str)
            .ok_or(LametricError::UnsupportedCapability(op))
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.endpoints.contains_key(&op)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    pub fn operations(&self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }

    /// Fetch the directory from the first candidate base URL that answers with a
    /// well-formed document.
    pub async fn discover(transport: &dyn Transport, host: &str) -> Result<Self> {
        let mut last_err: Option<LametricError> = None;

        for base in candidate_bases(host) {
            let url = format!("{}/api/v2", base);
            debug!(target: "capability", url = %url, "Probing device directory");

            let attempt = async {
                let doc = transport
                    .request(Method::Get, &url, None)
                    .await?
                    .error_for_status()?
                    .json()?
                    .ok_or_else(|| {
                        LametricError::DiscoveryError("empty directory document".to_string())
                    })?;
                Self::from_document(&base, &doc)
            };

            match attempt.await {
                Ok(map) => {
                    info!(
                        target: "capability",
                        base = %map.base_url,
                        api_version = ?map.api_version,
                        operations = map.endpoints.len(),
                        "Discovered device capabilities"
                    );
                    return Ok(map);
                }
                Err(e) => {
                    debug!(target: "capability", url = %url, error = %e, "Candidate failed");
                    last_err = Some(e);
                }
            }
        }

        warn!(target: "capability", host = %host, "Device directory unreachable");
        Err(LametricError::DiscoveryError(format!(
            "failed to fetch /api/v2 endpoint map from {} (last error: {})",
            host,
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "none".into())
        )))
    }
}

/// Base URLs tried during discovery, most common first
pub fn candidate_bases(host: &str) -> Vec<String> {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        return vec![host.to_string()];
    }
    vec![
        format!("https://{}:4343", host),
        format!("http://{}:8080", host),
        format!("https://{}", host),
        format!("http://{}", host),
    ]
}
