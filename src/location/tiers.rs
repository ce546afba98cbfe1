//! Resolution tiers and the chain that walks them.
//!
//! Each tier is one strategy with a uniform attempt/timeout contract. The
//! chain tries them strictly in order and always ends with the static
//! fallback, which cannot fail.

use super::providers::{DevicePositionSource, NetworkLocator};
use super::types::{
    AccuracySource, Coordinate, DesiredAccuracy, PositionRequest, PositioningError, ResolveError,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait Tier: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means the attempt is not raced against a timer.
    fn timeout(&self) -> Option<Duration>;

    async fn attempt(&self) -> Result<Coordinate, PositioningError>;
}

/// On-device positioning at a fixed accuracy.
pub struct DeviceTier {
    source: Arc<dyn DevicePositionSource>,
    accuracy: DesiredAccuracy,
    timeout: Duration,
}

impl DeviceTier {
    pub fn new(source: Arc<dyn DevicePositionSource>, accuracy: DesiredAccuracy, timeout: Duration) -> Self {
        Self { source, accuracy, timeout }
    }
}

#[async_trait]
impl Tier for DeviceTier {
    fn name(&self) -> &'static str {
        match self.accuracy {
            DesiredAccuracy::Precise => "device-precise",
            DesiredAccuracy::Approximate => "device-approximate",
        }
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn attempt(&self) -> Result<Coordinate, PositioningError> {
        let request = PositionRequest {
            desired_accuracy: self.accuracy,
            timeout: self.timeout,
        };
        let fix = self.source.current_position(request).await?;
        // Tagged with this tier, whatever quality the source claims.
        Ok(Coordinate::new(
            fix.latitude,
            fix.longitude,
            self.accuracy.accuracy_source(),
            fix.accuracy_radius_m,
        )?)
    }
}

/// Network-address-based lookup.
pub struct NetworkTier {
    locator: Arc<dyn NetworkLocator>,
    timeout: Duration,
}

impl NetworkTier {
    pub fn new(locator: Arc<dyn NetworkLocator>, timeout: Duration) -> Self {
        Self { locator, timeout }
    }
}

#[async_trait]
impl Tier for NetworkTier {
    fn name(&self) -> &'static str {
        "network"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn attempt(&self) -> Result<Coordinate, PositioningError> {
        let fix = self.locator.locate().await?;
        Ok(Coordinate::new(fix.latitude, fix.longitude, AccuracySource::NetworkDerived, None)?)
    }
}

/// Fixed city centroid.
#[derive(Debug, Clone, Copy)]
pub struct StaticTier {
    coordinate: Coordinate,
}

impl StaticTier {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate: coordinate.as_static_fallback(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }
}

#[async_trait]
impl Tier for StaticTier {
    fn name(&self) -> &'static str {
        "static"
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn attempt(&self) -> Result<Coordinate, PositioningError> {
        Ok(self.coordinate)
    }
}

/// Ordered tiers, terminated by a [`StaticTier`].
pub struct TierChain {
    tiers: Vec<Box<dyn Tier>>,
    fallback: StaticTier,
}

impl TierChain {
    /// `fallback` is always appended as the last tier.
    pub fn new(mut tiers: Vec<Box<dyn Tier>>, fallback: StaticTier) -> Self {
        tiers.push(Box::new(fallback));
        Self { tiers, fallback }
    }

    pub fn fallback(&self) -> Coordinate {
        self.fallback.coordinate()
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Walk the tiers in order, one at a time. The first success wins; any
    /// error or timeout moves on to the next tier without retrying.
    pub async fn run(&self) -> Result<Coordinate, ResolveError> {
        for tier in &self.tiers {
            let started = Instant::now();
            let outcome = match tier.timeout() {
                Some(limit) => match tokio::time::timeout(limit, tier.attempt()).await {
                    Ok(result) => result,
                    // The attempt future is dropped here; anything it would
                    // have produced is discarded.
                    Err(_) => Err(PositioningError::TimedOut),
                },
                None => tier.attempt().await,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(coordinate) => {
                    debug!(tier = tier.name(), elapsed_ms, "location tier succeeded");
                    return Ok(coordinate);
                }
                Err(e) => {
                    warn!(tier = tier.name(), elapsed_ms, error = %e, "location tier failed");
                }
            }
        }
        Err(ResolveError::AllSourcesExhausted)
    }
}
