//! Media reference → URL the device can fetch on its own
//!
//! The device pulls audio over the local network. It cannot follow a relative
//! path or reach the control host's filesystem, so every URL handed to
//! `send_notification` must be absolute. The base URL is operator
//! configuration: auto-detected hostnames are often wrong in multi-interface or
//! containerised deployments.

use crate::{LametricError, Result};
use url::Url;

/// Paths the platform serves statically
pub const DEFAULT_LOCAL_MARKERS: &[&str] = &["/local/", "/media/", "/api/tts_proxy/", "/api/tts/"];

const MEDIA_SOURCE_PREFIX: &str = "media-source://media_source/";

#[derive(Debug, Clone)]
pub struct UrlResolver {
    base_url: Option<String>,
    markers: Vec<String>,
}

impl UrlResolver {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .map(|b| b.trim().trim_end_matches('/').to_string())
                .filter(|b| !b.is_empty()),
            markers: DEFAULT_LOCAL_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Resolve `reference` into an absolute `http`/`https` URL.
    ///
    /// 1. Already absolute with an http(s) scheme: returned unchanged.
    /// 2. Starts with a local-media marker: `base_url + reference`.
    /// 3. Anything else: `UnresolvableUrl`. Nothing is guessed.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        let reference = reference.trim();

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Url::parse(reference)
                .map(|_| reference.to_string())
                .map_err(|e| unresolvable(reference, format!("malformed URL: {}", e)));
        }

        let path = match reference.strip_prefix(MEDIA_SOURCE_PREFIX) {
            Some(rest) => format!("/media/{}", rest),
            None => reference.to_string(),
        };

        if path.starts_with("media-source://") {
            return Err(unresolvable(
                reference,
                "platform media id; it must be resolved through the platform's media source first"
                    .to_string(),
            ));
        }

        if !self.markers.iter().any(|m| path.starts_with(m.as_str())) {
            return Err(unresolvable(
                reference,
                format!(
                    "not an http(s) URL and not under a served path ({})",
                    self.markers.join(", ")
                ),
            ));
        }

        let base = self.base_url.as_deref().ok_or_else(|| {
            unresolvable(
                reference,
                "need an absolute URL but no base_url is configured; \
                 set base_url to an address of this host the device can reach"
                    .to_string(),
            )
        })?;

        let joined = format!("{}{}", base, path);
        Url::parse(&joined)
            .map(|_| joined.clone())
            .map_err(|e| unresolvable(reference, format!("base_url produced '{}': {}", joined, e)))
    }
}

fn unresolvable(reference: &str, reason: String) -> LametricError {
    LametricError::UnresolvableUrl {
        reference: reference.to_string(),
        reason,
    }
}
