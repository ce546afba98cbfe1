//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which resolution tier produced a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccuracySource {
    Precise,
    Approximate,
    NetworkDerived,
    StaticFallback,
}

impl fmt::Display for AccuracySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precise => write!(f, "GPS"),
            Self::Approximate => write!(f, "GPS (approximate)"),
            Self::NetworkDerived => write!(f, "IP"),
            Self::StaticFallback => write!(f, "Built-in"),
        }
    }
}

/// A validated position tagged with the tier that produced it.
///
/// Latitude and longitude are always inside their valid ranges: the only ways
/// to build one are [`Coordinate::new`] and deserialization, and both check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
    accuracy_source: AccuracySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy_radius_m: Option<f64>,
}

#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
    accuracy_source: AccuracySource,
    #[serde(default)]
    accuracy_radius_m: Option<f64>,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = InvalidCoordinate;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude, raw.accuracy_source, raw.accuracy_radius_m)
    }
}

impl Coordinate {
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy_source: AccuracySource,
        accuracy_radius_m: Option<f64>,
    ) -> Result<Self, InvalidCoordinate> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(InvalidCoordinate { latitude, longitude });
        }
        // A negative or NaN radius carries no information.
        let accuracy_radius_m = accuracy_radius_m.filter(|r| r.is_finite() && *r >= 0.0);
        Ok(Self {
            latitude,
            longitude,
            accuracy_source,
            accuracy_radius_m,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn accuracy_source(&self) -> AccuracySource {
        self.accuracy_source
    }

    pub fn accuracy_radius_m(&self) -> Option<f64> {
        self.accuracy_radius_m
    }

    /// The same position, demoted to a static fallback.
    pub(crate) fn as_static_fallback(self) -> Self {
        Self {
            accuracy_source: AccuracySource::StaticFallback,
            accuracy_radius_m: None,
            ..self
        }
    }

    /// One-line banner for terminal output.
    pub fn display_line(&self) -> String {
        let radius = match self.accuracy_radius_m {
            Some(r) => format!(" \u{00B1}{:.0} m", r),
            None => String::new(),
        };
        format!(
            "\u{1F4CD} {} ({}{})",
            format_coords(self.latitude, self.longitude),
            self.accuracy_source,
            radius
        )
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_coords(self.latitude, self.longitude))
    }
}

/// Centroid of the capital, Jakarta. Used when every other source fails.
pub const CAPITAL_FALLBACK: Coordinate = Coordinate {
    latitude: -6.2088,
    longitude: 106.8456,
    accuracy_source: AccuracySource::StaticFallback,
    accuracy_radius_m: None,
};

/// Format a coordinate pair as e.g. `6.2088° S, 106.8456° E`.
pub fn format_coords(lat: f64, lon: f64) -> String {
    let ns = if lat < 0.0 { 'S' } else { 'N' };
    let ew = if lon < 0.0 { 'W' } else { 'E' };
    format!("{:.4}\u{00B0} {}, {:.4}\u{00B0} {}", lat.abs(), ns, lon.abs(), ew)
}

/// A coordinate together with the moment it was acquired.
///
/// Always read and written as one value so the coordinate and its timestamp
/// can never be observed out of step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedLocation {
    pub coordinate: Coordinate,
    pub acquired_at_ms: i64,
}

impl CachedLocation {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.acquired_at_ms
    }

    /// Fresh while the age is strictly below the window.
    pub fn is_fresh(&self, now_ms: i64, window_ms: i64) -> bool {
        self.age_ms(now_ms) < window_ms
    }
}

/// Accuracy requested from an on-device source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredAccuracy {
    Precise,
    Approximate,
}

impl DesiredAccuracy {
    pub fn accuracy_source(self) -> AccuracySource {
        match self {
            Self::Precise => AccuracySource::Precise,
            Self::Approximate => AccuracySource::Approximate,
        }
    }
}

/// A single request to an on-device positioning source.
#[derive(Debug, Clone, Copy)]
pub struct PositionRequest {
    pub desired_accuracy: DesiredAccuracy,
    pub timeout: std::time::Duration,
}

/// Raw fix reported by an on-device source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_radius_m: Option<f64>,
    pub quality: DesiredAccuracy,
}

/// Raw fix reported by the network geolocation service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Classified positioning failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositioningError {
    #[error("location permission denied")]
    Denied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("positioning timed out")]
    TimedOut,
    #[error("positioning not supported by this source")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("coordinate out of range: lat={latitude}, lon={longitude}")]
pub struct InvalidCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<InvalidCoordinate> for PositioningError {
    fn from(e: InvalidCoordinate) -> Self {
        PositioningError::Unavailable(e.to_string())
    }
}

/// Failure of the fallible part of the tier chain.
///
/// Never escapes the resolver: the static fallback absorbs it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("all positioning sources exhausted")]
    AllSourcesExhausted,
}
