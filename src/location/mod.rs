//! Location subsystem.
//!
//! Resolves the requester's position through an ordered chain of sources
//! (precise device, approximate device, IP lookup, static centroid) behind a
//! short-lived memory cache and a durable record.

pub mod cache;
pub mod geo;
pub mod gpsd;
pub mod providers;
pub mod resolver;
pub mod tiers;
pub mod types;

pub use cache::{CacheStore, FileStore, MemoryStore};
pub use geo::distance_km;
pub use gpsd::GpsdSource;
pub use providers::{DevicePositionSource, IpApiLocator, NetworkLocator, NoDevice, Offline};
pub use resolver::{LocationResolver, ResolverConfig, WatchHandle};
pub use types::{AccuracySource, CachedLocation, Coordinate, PositioningError, CAPITAL_FALLBACK};
