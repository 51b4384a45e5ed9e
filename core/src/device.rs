//! Typed LaMetric Device API v2 client
//!
//! Every method resolves its endpoint through the [`CapabilityMap`] first, so an
//! operation the firmware does not advertise fails with `UnsupportedCapability`
//! before any request is made.

use crate::capability::{CapabilityMap, Operation};
use crate::notification::{Notification, Priority};
use crate::transport::{Method, Transport};
use crate::{LametricError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Id the device assigns to an accepted notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NotificationId(pub String);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }
        Ok(match RawId::deserialize(d)? {
            RawId::Text(s) => NotificationId(s),
            RawId::Number(n) => NotificationId(n.to_string()),
        })
    }
}

/// Entry of the device notification queue
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueuedNotification {
    pub id: NotificationId,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub model: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    pub package: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchDirection {
    Next,
    Prev,
}

impl SwitchDirection {
    fn operation(self) -> Operation {
        match self {
            SwitchDirection::Next => Operation::AppsSwitchNext,
            SwitchDirection::Prev => Operation::AppsSwitchPrev,
        }
    }
}

pub struct DeviceClient {
    transport: Arc<dyn Transport>,
    host: String,
    capabilities: RwLock<Option<Arc<CapabilityMap>>>,
}

impl DeviceClient {
    /// Client that discovers capabilities on first use
    pub fn new(transport: Arc<dyn Transport>, host: impl Into<String>) -> Self {
        Self {
            transport,
            host: host.into(),
            capabilities: RwLock::new(None),
        }
    }

    /// Client with an already known capability map
    pub fn with_capabilities(transport: Arc<dyn Transport>, map: CapabilityMap) -> Self {
        Self {
            transport,
            host: map.base_url().to_string(),
            capabilities: RwLock::new(Some(Arc::new(map))),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Cached capability map, discovered on first call
    pub async fn capabilities(&self) -> Result<Arc<CapabilityMap>> {
        if let Some(map) = self.capabilities.read().await.as_ref() {
            return Ok(Arc::clone(map));
        }
        let mut slot = self.capabilities.write().await;
        // Another caller may have finished discovery while we waited for the lock
        if let Some(map) = slot.as_ref() {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(CapabilityMap::discover(self.transport.as_ref(), &self.host).await?);
        *slot = Some(Arc::clone(&map));
        Ok(map)
    }

    /// Drop the cached map and fetch the directory again (e.g. after a firmware update)
    pub async fn rediscover(&self) -> Result<Arc<CapabilityMap>> {
        let mut slot = self.capabilities.write().await;
        let map = Arc::new(CapabilityMap::discover(self.transport.as_ref(), &self.host).await?);
        info!(target: "device", host = %self.host, "Capability map rebuilt");
        *slot = Some(Arc::clone(&map));
        Ok(map)
    }

    async fn endpoint(&self, op: Operation) -> Result<String> {
        let map = self.capabilities().await?;
        map.lookup(op).map(str::to_string)
    }

    async fn call(&self, method: Method, url: &str, body: Option<Value>) -> Result<Option<Value>> {
        self.transport
            .request(method, url, body)
            .await?
            .error_for_status()?
            .json()
    }

    /// DELETE that treats "nothing there" as success, like the device does
    async fn delete_idempotent(&self, url: &str) -> Result<()> {
        let resp = self.transport.request(Method::Delete, url, None).await?;
        if resp.status == 404 {
            debug!(target: "device", url = %url, "Nothing to dismiss");
            return Ok(());
        }
        resp.error_for_status().map(|_| ())
    }

    pub async fn get_device(&self) -> Result<DeviceInfo> {
        let url = self.endpoint(Operation::Device).await?;
        match self.call(Method::Get, &url, None).await? {
            Some(v @ Value::Object(_)) => Ok(serde_json::from_value(v)?),
            other => Err(LametricError::MalformedResponse(format!(
                "unexpected /device response: {:?}",
                other
            ))),
        }
    }

    /// Queue a notification. Success means the device accepted it, not that it played.
    pub async fn send_notification(&self, notification: &Notification) -> Result<NotificationId> {
        let url = self.endpoint(Operation::Notifications).await?;
        let body = serde_json::to_value(notification)?;
        let resp = self.call(Method::Post, &url, Some(body)).await?;

        let id = resp
            .as_ref()
            .and_then(|v| v.get("success"))
            .and_then(|s| s.get("id"))
            .cloned()
            .ok_or_else(|| {
                LametricError::MalformedResponse(format!(
                    "notification accepted without an id: {:?}",
                    resp
                ))
            })?;
        let id: NotificationId = serde_json::from_value(id)?;
        debug!(target: "device", id = %id, "Notification accepted");
        Ok(id)
    }

    pub async fn list_notifications(&self) -> Result<Vec<QueuedNotification>> {
        let url = self.endpoint(Operation::Notifications).await?;
        match self.call(Method::Get, &url, None).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v) => Ok(serde_json::from_value(v)?),
        }
    }

    /// Notification currently on screen, if any
    pub async fn current_notification(&self) -> Result<Option<QueuedNotification>> {
        let url = self.endpoint(Operation::CurrentNotification).await?;
        let resp = self.transport.request(Method::Get, &url, None).await?;
        if resp.status == 404 {
            return Ok(None);
        }
        match resp.error_for_status()?.json()? {
            Some(v) if v.get("id").is_some() => Ok(Some(serde_json::from_value(v)?)),
            _ => Ok(None),
        }
    }

    pub async fn dismiss(&self, id: &NotificationId) -> Result<()> {
        let template = self.endpoint(Operation::ConcreteNotification).await?;
        let url = expand_id_template(&template, &id.0);
        self.delete_idempotent(&url).await
    }

    /// Dismiss whatever is on screen; no-op when nothing is
    pub async fn dismiss_current(&self) -> Result<()> {
        match self.current_notification().await? {
            Some(current) => {
                debug!(target: "device", id = %current.id, "Dismissing current notification");
                self.dismiss(&current.id).await
            }
            None => {
                debug!(target: "device", "No current notification");
                Ok(())
            }
        }
    }

    /// Blanket dismiss of the whole queue; no-op when empty
    pub async fn dismiss_all(&self) -> Result<()> {
        let url = self.endpoint(Operation::Notifications).await?;
        self.delete_idempotent(&url).await
    }

    pub async fn get_apps(&self) -> Result<Vec<AppInfo>> {
        let url = self.endpoint(Operation::AppsList).await?;
        let mut apps: Vec<AppInfo> = match self.call(Method::Get, &url, None).await? {
            // Firmware returns an object keyed by package name
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(package, mut v)| {
                    if let Some(obj) = v.as_object_mut() {
                        obj.entry("package").or_insert(Value::String(package));
                    }
                    serde_json::from_value(v)
                })
                .collect::<std::result::Result<_, _>>()?,
            Some(v @ Value::Array(_)) => serde_json::from_value(v)?,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(LametricError::MalformedResponse(format!(
                    "unexpected apps response: {}",
                    other
                )))
            }
        };
        apps.sort_by(|a, b| a.package.cmp(&b.package));
        Ok(apps)
    }

    pub async fn switch_app(&self, direction: SwitchDirection) -> Result<()> {
        let url = self.endpoint(direction.operation()).await?;
        self.call(Method::Post, &url, None).await.map(|_| ())
    }
}

/// Expand the directory's `{/:id}` style template
fn expand_id_template(template: &str, id: &str) -> String {
    if template.contains("{/:id}") {
        template.replace("{/:id}", &format!("/{}", id))
    } else if template.contains(":id") {
        template.replace(":id", id)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), id)
    }
}
