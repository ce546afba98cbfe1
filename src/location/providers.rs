//! Positioning collaborators: on-device sources and IP-based geolocation.

use super::types::{DeviceFix, NetworkFix, PositionRequest, PositioningError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

/// Continuous stream of fixes (or classified errors) from a device source.
pub type FixStream = mpsc::Receiver<Result<DeviceFix, PositioningError>>;

/// An on-device positioning source.
#[async_trait]
pub trait DevicePositionSource: Send + Sync {
    /// One-shot fix at the requested accuracy.
    ///
    /// `request.timeout` is advisory; callers enforce it themselves.
    async fn current_position(&self, request: PositionRequest) -> Result<DeviceFix, PositioningError>;

    /// Subscribe to continuous updates. The stream ends when the source goes away.
    async fn watch(&self) -> Result<FixStream, PositioningError> {
        Err(PositioningError::Unsupported)
    }
}

/// Network-address-based geolocation.
#[async_trait]
pub trait NetworkLocator: Send + Sync {
    async fn locate(&self) -> Result<NetworkFix, PositioningError>;
}

/// A host with no positioning hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevice;

#[async_trait]
impl DevicePositionSource for NoDevice {
    async fn current_position(&self, _request: PositionRequest) -> Result<DeviceFix, PositioningError> {
        Err(PositioningError::Unsupported)
    }
}

/// A network locator that never answers; used in offline mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

#[async_trait]
impl NetworkLocator for Offline {
    async fn locate(&self) -> Result<NetworkFix, PositioningError> {
        Err(PositioningError::Unavailable("offline mode".into()))
    }
}

// ─── IP-based geolocation ───────────────────────────────────────

pub const IPAPI_URL: &str = "https://ipapi.co/json/";

#[derive(Deserialize)]
struct IpApiResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

/// Geolocation of the caller's public address via ipapi.co.
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    url: String,
    request_timeout: Duration,
}

impl IpApiLocator {
    pub fn new() -> Self {
        Self::with_url(IPAPI_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn fetch(url: &str, timeout: Duration) -> Result<NetworkFix, PositioningError> {
        let response = ureq::get(url)
            .set("User-Agent", "CariLokasi/0.1")
            .timeout(timeout)
            .call()
            .map_err(|e| PositioningError::Unavailable(e.to_string()))?;

        let r: IpApiResult = response
            .into_json()
            .map_err(|e| PositioningError::Unavailable(format!("invalid response: {}", e)))?;

        parse_ipapi(r)
    }
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_ipapi(r: IpApiResult) -> Result<NetworkFix, PositioningError> {
    if r.error {
        return Err(PositioningError::Unavailable(
            r.reason.unwrap_or_else(|| "lookup rejected".into()),
        ));
    }
    let latitude = r.latitude.ok_or_else(|| PositioningError::Unavailable("no latitude".into()))?;
    let longitude = r.longitude.ok_or_else(|| PositioningError::Unavailable("no longitude".into()))?;
    Ok(NetworkFix { latitude, longitude })
}

#[async_trait]
impl NetworkLocator for IpApiLocator {
    async fn locate(&self) -> Result<NetworkFix, PositioningError> {
        let url = self.url.clone();
        let timeout = self.request_timeout;
        // ureq blocks; if the caller gives up, the thread finishes on its own
        // and the result is dropped.
        tokio::task::spawn_blocking(move || Self::fetch(&url, timeout))
            .await
            .map_err(|e| PositioningError::Unavailable(e.to_string()))?
    }
}
