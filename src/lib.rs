//! Cari Lokasi: location-search intent classification plus a cascading,
//! cached position resolver.

pub mod assistant;
pub mod clock;
pub mod intent;
pub mod location;
