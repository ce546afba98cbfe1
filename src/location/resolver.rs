//! Location resolver: cache first, then the tier chain.
//!
//! Flow:   memory cache (5 min) → durable cache (30 min, once per instance)
//!         → precise device → approximate device → IP lookup → static centroid
//!
//! Always yields a coordinate.

use super::cache::{CacheStore, LocationCache};
use super::geo;
use super::providers::{DevicePositionSource, NetworkLocator};
use super::tiers::{DeviceTier, NetworkTier, StaticTier, Tier, TierChain};
use super::types::{
    CachedLocation, Coordinate, DesiredAccuracy, PositioningError, CAPITAL_FALLBACK,
};
use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

/// Timeouts, freshness windows and the static fallback.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub precise_timeout: Duration,
    pub approximate_timeout: Duration,
    pub network_timeout: Duration,
    /// Freshness window of the in-memory entry.
    pub memory_ttl: Duration,
    /// Freshness window of the durable record, checked once at startup.
    pub durable_ttl: Duration,
    pub fallback: Coordinate,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            precise_timeout: Duration::from_secs(10),
            approximate_timeout: Duration::from_secs(5),
            network_timeout: Duration::from_secs(5),
            memory_ttl: Duration::from_secs(5 * 60),
            durable_ttl: Duration::from_secs(30 * 60),
            fallback: CAPITAL_FALLBACK,
        }
    }
}

fn as_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Opaque handle for a running position watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

struct WatchEntry {
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

/// The location resolver with its fallback pipeline.
pub struct LocationResolver {
    device: Arc<dyn DevicePositionSource>,
    network: Arc<dyn NetworkLocator>,
    chain: TierChain,
    cache: Arc<LocationCache>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    durable_checked: AtomicBool,
    watches: Arc<Mutex<HashMap<u64, WatchEntry>>>,
    next_watch: AtomicU64,
}

impl LocationResolver {
    pub fn new(
        device: Arc<dyn DevicePositionSource>,
        network: Arc<dyn NetworkLocator>,
        store: Box<dyn CacheStore>,
    ) -> Self {
        let config = ResolverConfig::default();
        Self {
            chain: build_chain(&config, &device, &network),
            device,
            network,
            cache: Arc::new(LocationCache::new(store)),
            clock: Arc::new(SystemClock),
            config,
            durable_checked: AtomicBool::new(false),
            watches: Arc::new(Mutex::new(HashMap::new())),
            next_watch: AtomicU64::new(1),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.chain = build_chain(&config, &self.device, &self.network);
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Consistent copy of the in-memory cache entry, fresh or not.
    pub fn cached(&self) -> Option<CachedLocation> {
        self.cache.snapshot()
    }

    /// Best-effort position of the requester. Never fails.
    pub async fn resolve_location(&self) -> Coordinate {
        let now = self.clock.now_ms();

        // 1. In-memory cache
        if let Some(hit) = self.cache.fresh(now, as_ms(self.config.memory_ttl)) {
            debug!(age_ms = hit.age_ms(now), "location served from memory cache");
            return hit.coordinate;
        }

        // 2. Durable cache, only before anything lives in memory
        if let Some(restored) = self.restore_durable(now).await {
            info!(age_ms = restored.age_ms(now), source = %restored.coordinate.accuracy_source(),
                "location restored from durable cache");
            return restored.coordinate;
        }

        // 3. Tier chain
        let coordinate = match self.chain.run().await {
            Ok(c) => c,
            Err(e) => {
                // Unreachable while the chain ends in a static tier.
                error!(error = %e, "tier chain exhausted, using static fallback");
                self.chain.fallback()
            }
        };

        info!(source = %coordinate.accuracy_source(), "location resolved");
        self.cache.store(CachedLocation {
            coordinate,
            acquired_at_ms: self.clock.now_ms(),
        })
        .await;
        coordinate
    }

    async fn restore_durable(&self, now: i64) -> Option<CachedLocation> {
        if self.durable_checked.swap(true, Ordering::SeqCst) {
            return None;
        }
        if self.cache.snapshot().is_some() {
            return None;
        }
        let entry = self
            .cache
            .load_durable()
            .await
            .filter(|e| e.is_fresh(now, as_ms(self.config.durable_ttl)))?;
        Some(self.cache.adopt(entry))
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
        geo::distance_km(a, b)
    }

    /// Subscribe to continuous updates from the device source.
    ///
    /// Every fix refreshes the cache, then `on_update` runs. Errors go to
    /// `on_error` and leave the cache untouched. Must be called from within a
    /// tokio runtime.
    pub fn watch_position<U, E>(&self, on_update: U, on_error: E) -> WatchHandle
    where
        U: Fn(Coordinate) + Send + Sync + 'static,
        E: Fn(PositioningError) + Send + Sync + 'static,
    {
        let id = self.next_watch.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));

        let device = Arc::clone(&self.device);
        let cache = Arc::clone(&self.cache);
        let clock = Arc::clone(&self.clock);
        let flag = Arc::clone(&cancelled);
        let watches = Arc::clone(&self.watches);

        // Held across the spawn so a task that ends at once cannot try to
        // deregister before it is registered.
        let mut registry = lock_watches(&self.watches);
        let task = tokio::spawn(async move {
            run_watch(device, cache, clock, flag, on_update, on_error).await;
            lock_watches(&watches).remove(&id);
            debug!(watch = id, "position watch ended");
        });
        registry.insert(
            id,
            WatchEntry {
                cancelled,
                abort: task.abort_handle(),
            },
        );
        WatchHandle(id)
    }

    /// Stop a watch. Returns `false` if it was already cancelled or has
    /// ended on its own.
    pub fn cancel_watch(&self, handle: WatchHandle) -> bool {
        match lock_watches(&self.watches).remove(&handle.0) {
            Some(entry) => {
                entry.cancelled.store(true, Ordering::SeqCst);
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Number of watches still running.
    pub fn active_watches(&self) -> usize {
        lock_watches(&self.watches).len()
    }
}

fn lock_watches(watches: &Mutex<HashMap<u64, WatchEntry>>) -> MutexGuard<'_, HashMap<u64, WatchEntry>> {
    watches.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_watch<U, E>(
    device: Arc<dyn DevicePositionSource>,
    cache: Arc<LocationCache>,
    clock: Arc<dyn Clock>,
    cancelled: Arc<AtomicBool>,
    on_update: U,
    on_error: E,
) where
    U: Fn(Coordinate),
    E: Fn(PositioningError),
{
    let mut stream = match device.watch().await {
        Ok(stream) => stream,
        Err(e) => {
            if !cancelled.load(Ordering::SeqCst) {
                on_error(e);
            }
            return;
        }
    };

    while let Some(item) = stream.recv().await {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let fix = match item {
            Ok(fix) => fix,
            Err(e) => {
                on_error(e);
                continue;
            }
        };
        match Coordinate::new(
            fix.latitude,
            fix.longitude,
            fix.quality.accuracy_source(),
            fix.accuracy_radius_m,
        ) {
            Ok(coordinate) => {
                cache
                    .store(CachedLocation {
                        coordinate,
                        acquired_at_ms: clock.now_ms(),
                    })
                    .await;
                on_update(coordinate);
            }
            Err(e) => on_error(e.into()),
        }
    }
}

impl Drop for LocationResolver {
    fn drop(&mut self) {
        for (_, entry) in lock_watches(&self.watches).drain() {
            entry.cancelled.store(true, Ordering::SeqCst);
            entry.abort.abort();
        }
    }
}

fn build_chain(
    config: &ResolverConfig,
    device: &Arc<dyn DevicePositionSource>,
    network: &Arc<dyn NetworkLocator>,
) -> TierChain {
    let tiers: Vec<Box<dyn Tier>> = vec![
        Box::new(DeviceTier::new(Arc::clone(device), DesiredAccuracy::Precise, config.precise_timeout)),
        Box::new(DeviceTier::new(Arc::clone(device), DesiredAccuracy::Approximate, config.approximate_timeout)),
        Box::new(NetworkTier::new(Arc::clone(network), config.network_timeout)),
    ];
    TierChain::new(tiers, StaticTier::new(config.fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::location::cache::MemoryStore;
    use crate::location::providers::FixStream;
    use crate::location::types::{AccuracySource, DeviceFix, NetworkFix, PositionRequest};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    const MINUTE_MS: i64 = 60 * 1000;

    struct FakeDevice {
        precise: Mutex<Result<DeviceFix, PositioningError>>,
        approximate: Mutex<Result<DeviceFix, PositioningError>>,
        precise_delay: Duration,
        calls: AtomicUsize,
        stream: Mutex<Option<FixStream>>,
    }

    impl FakeDevice {
        fn new(
            precise: Result<DeviceFix, PositioningError>,
            approximate: Result<DeviceFix, PositioningError>,
        ) -> Self {
            Self {
                precise: Mutex::new(precise),
                approximate: Mutex::new(approximate),
                precise_delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                stream: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self::new(Err(PositioningError::Denied), Err(PositioningError::Unavailable("no sensor".into())))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DevicePositionSource for FakeDevice {
        async fn current_position(&self, request: PositionRequest) -> Result<DeviceFix, PositioningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.desired_accuracy {
                DesiredAccuracy::Precise => {
                    tokio::time::sleep(self.precise_delay).await;
                    self.precise.lock().unwrap().clone()
                }
                DesiredAccuracy::Approximate => self.approximate.lock().unwrap().clone(),
            }
        }

        async fn watch(&self) -> Result<FixStream, PositioningError> {
            self.stream.lock().unwrap().take().ok_or(PositioningError::Unsupported)
        }
    }

    struct FakeNetwork {
        result: Result<NetworkFix, PositioningError>,
        calls: AtomicUsize,
    }

    impl FakeNetwork {
        fn new(result: Result<NetworkFix, PositioningError>) -> Self {
            Self { result, calls: AtomicUsize::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NetworkLocator for FakeNetwork {
        async fn locate(&self) -> Result<NetworkFix, PositioningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn fix(lat: f64, quality: DesiredAccuracy) -> DeviceFix {
        DeviceFix { latitude: lat, longitude: 106.8, accuracy_radius_m: Some(8.0), quality }
    }

    fn network_down() -> FakeNetwork {
        FakeNetwork::new(Err(PositioningError::Unavailable("HTTP 503".into())))
    }

    struct Harness {
        resolver: LocationResolver,
        device: Arc<FakeDevice>,
        network: Arc<FakeNetwork>,
        clock: Arc<ManualClock>,
    }

    fn harness(device: FakeDevice, network: FakeNetwork, store: MemoryStore) -> Harness {
        let device = Arc::new(device);
        let network = Arc::new(network);
        let clock = Arc::new(ManualClock::new(100 * MINUTE_MS));
        let resolver = LocationResolver::new(device.clone(), network.clone(), Box::new(store))
            .with_clock(clock.clone());
        Harness { resolver, device, network, clock }
    }

    #[tokio::test]
    async fn test_second_call_within_window_hits_cache() {
        let h = harness(
            FakeDevice::new(Ok(fix(-6.2, DesiredAccuracy::Precise)), Err(PositioningError::Denied)),
            network_down(),
            MemoryStore::new(),
        );

        let first = h.resolver.resolve_location().await;
        h.clock.advance_ms(4 * MINUTE_MS);
        let second = h.resolver.resolve_location().await;

        assert_eq!(first, second);
        assert_eq!(first.accuracy_source(), AccuracySource::Precise);
        assert_eq!(h.device.calls(), 1);
        assert_eq!(h.network.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_sources_fail_returns_static_fallback() {
        let h = harness(FakeDevice::failing(), network_down(), MemoryStore::new());

        let c = h.resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::StaticFallback);
        assert_eq!(c, CAPITAL_FALLBACK);
        assert_eq!(h.device.calls(), 2);
        assert_eq!(h.network.calls(), 1);
    }

    #[tokio::test]
    async fn test_denied_precise_falls_to_approximate() {
        let h = harness(
            FakeDevice::new(Err(PositioningError::Denied), Ok(fix(-6.3, DesiredAccuracy::Precise))),
            network_down(),
            MemoryStore::new(),
        );

        let c = h.resolver.resolve_location().await;
        // Tagged by the tier that produced it, not by the fix quality.
        assert_eq!(c.accuracy_source(), AccuracySource::Approximate);
        assert_eq!(h.network.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_tier_after_device_failure() {
        let h = harness(
            FakeDevice::failing(),
            FakeNetwork::new(Ok(NetworkFix { latitude: -7.25, longitude: 112.75 })),
            MemoryStore::new(),
        );

        let c = h.resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::NetworkDerived);
        assert!((c.latitude() + 7.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_out_of_range_fix_is_a_tier_failure() {
        let h = harness(
            FakeDevice::new(Ok(fix(123.0, DesiredAccuracy::Precise)), Err(PositioningError::Denied)),
            FakeNetwork::new(Ok(NetworkFix { latitude: 1.0, longitude: 2.0 })),
            MemoryStore::new(),
        );

        let c = h.resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::NetworkDerived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_precise_timeout_discards_late_fix() {
        let mut device = FakeDevice::new(
            Ok(fix(-6.1, DesiredAccuracy::Precise)),
            Ok(fix(-6.9, DesiredAccuracy::Approximate)),
        );
        device.precise_delay = Duration::from_secs(30);
        let h = harness(device, network_down(), MemoryStore::new());

        let c = h.resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::Approximate);

        // Let the abandoned attempt's deadline pass; nothing may reach the cache.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let cached = h.resolver.cached().unwrap();
        assert_eq!(cached.coordinate, c);
    }

    #[tokio::test]
    async fn test_expired_cache_requeries_and_downgrades() {
        let h = harness(
            FakeDevice::new(Ok(fix(-6.2, DesiredAccuracy::Precise)), Ok(fix(-6.4, DesiredAccuracy::Approximate))),
            network_down(),
            MemoryStore::new(),
        );

        let first = h.resolver.resolve_location().await;
        assert_eq!(first.accuracy_source(), AccuracySource::Precise);

        *h.device.precise.lock().unwrap() = Err(PositioningError::TimedOut);
        h.clock.advance_ms(5 * MINUTE_MS);

        let second = h.resolver.resolve_location().await;
        assert_eq!(second.accuracy_source(), AccuracySource::Approximate);
        assert_eq!(h.resolver.cached().unwrap().coordinate, second);
    }

    #[tokio::test]
    async fn test_successful_resolution_persists() {
        let store = Arc::new(MemoryStore::new());
        struct Shared(Arc<MemoryStore>);
        impl CacheStore for Shared {
            fn load(&self) -> Option<CachedLocation> {
                self.0.load()
            }
            fn save(&self, entry: &CachedLocation) -> Result<(), crate::location::cache::StoreError> {
                self.0.save(entry)
            }
        }

        let device = Arc::new(FakeDevice::new(Ok(fix(-6.2, DesiredAccuracy::Precise)), Err(PositioningError::Denied)));
        let resolver = LocationResolver::new(device, Arc::new(network_down()), Box::new(Shared(store.clone())));
        let c = resolver.resolve_location().await;

        assert_eq!(store.load().unwrap().coordinate, c);
    }

    #[tokio::test]
    async fn test_durable_record_restored_within_window() {
        let durable = CachedLocation {
            coordinate: Coordinate::new(-6.5, 106.9, AccuracySource::Precise, None).unwrap(),
            acquired_at_ms: 100 * MINUTE_MS - 20 * MINUTE_MS,
        };
        let h = harness(FakeDevice::failing(), network_down(), MemoryStore::with_entry(durable));

        let c = h.resolver.resolve_location().await;
        assert_eq!(c, durable.coordinate);
        assert_eq!(h.device.calls(), 0);

        // Adopted with its original age, so the 5 minute window is already
        // spent and the durable record is not consulted a second time.
        let again = h.resolver.resolve_location().await;
        assert_eq!(again.accuracy_source(), AccuracySource::StaticFallback);
        assert_eq!(h.device.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_durable_record_ignored() {
        let durable = CachedLocation {
            coordinate: Coordinate::new(-6.5, 106.9, AccuracySource::Precise, None).unwrap(),
            acquired_at_ms: 100 * MINUTE_MS - 31 * MINUTE_MS,
        };
        let h = harness(FakeDevice::failing(), network_down(), MemoryStore::with_entry(durable));

        let c = h.resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::StaticFallback);
        assert_eq!(h.network.calls(), 1);
    }

    #[tokio::test]
    async fn test_custom_fallback_is_tagged_static() {
        let config = ResolverConfig {
            fallback: Coordinate::new(-7.7956, 110.3695, AccuracySource::Precise, None).unwrap(),
            ..ResolverConfig::default()
        };
        let h = harness(FakeDevice::failing(), network_down(), MemoryStore::new());
        let resolver = h.resolver.with_config(config);

        let c = resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::StaticFallback);
        assert!((c.latitude() + 7.7956).abs() < 1e-9);
    }

    #[test]
    fn test_distance_delegates_to_haversine() {
        let a = Coordinate::new(0.0, 0.0, AccuracySource::Precise, None).unwrap();
        let b = Coordinate::new(1.0, 0.0, AccuracySource::Precise, None).unwrap();
        assert_eq!(LocationResolver::distance_km(&a, &a), 0.0);
        assert!((LocationResolver::distance_km(&a, &b) - 111.19).abs() < 1.2);
    }

    #[tokio::test]
    async fn test_watch_updates_cache_and_reports_errors() {
        let (tx, rx) = mpsc::channel(8);
        let device = FakeDevice::failing();
        *device.stream.lock().unwrap() = Some(rx);
        let h = harness(device, network_down(), MemoryStore::new());

        let (up_tx, mut up_rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let handle = h.resolver.watch_position(
            move |c| {
                let _ = up_tx.send(c);
            },
            move |e| {
                let _ = err_tx.send(e);
            },
        );

        tx.send(Ok(fix(-6.21, DesiredAccuracy::Precise))).await.unwrap();
        let update = up_rx.recv().await.unwrap();
        assert_eq!(update.accuracy_source(), AccuracySource::Precise);
        assert_eq!(h.resolver.cached().unwrap().coordinate, update);

        tx.send(Err(PositioningError::TimedOut)).await.unwrap();
        assert_eq!(err_rx.recv().await.unwrap(), PositioningError::TimedOut);
        assert_eq!(h.resolver.cached().unwrap().coordinate, update);

        // Watch-fed cache serves resolve_location without touching tiers.
        assert_eq!(h.resolver.resolve_location().await, update);
        assert_eq!(h.device.calls(), 0);

        assert!(h.resolver.cancel_watch(handle));
        assert!(!h.resolver.cancel_watch(handle));

        // The task is gone: the sender sees a closed channel soon after.
        tx.closed().await;
        assert!(up_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_unsupported_reports_error() {
        let h = harness(FakeDevice::failing(), network_down(), MemoryStore::new());
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let handle = h.resolver.watch_position(
            |_| {},
            move |e| {
                let _ = err_tx.send(e);
            },
        );

        assert_eq!(err_rx.recv().await.unwrap(), PositioningError::Unsupported);
        assert!(h.resolver.cached().is_none());

        // The callback is dropped only after the task has deregistered itself.
        assert!(err_rx.recv().await.is_none());
        assert_eq!(h.resolver.active_watches(), 0);
        assert!(!h.resolver.cancel_watch(handle));
    }

    #[tokio::test]
    async fn test_watch_ends_when_stream_closes() {
        let (tx, rx) = mpsc::channel(8);
        let device = FakeDevice::failing();
        *device.stream.lock().unwrap() = Some(rx);
        let h = harness(device, network_down(), MemoryStore::new());

        let (up_tx, mut up_rx) = mpsc::unbounded_channel();
        let handle = h.resolver.watch_position(
            move |c| {
                let _ = up_tx.send(c);
            },
            |_| {},
        );
        assert_eq!(h.resolver.active_watches(), 1);

        tx.send(Ok(fix(-6.3, DesiredAccuracy::Approximate))).await.unwrap();
        let update = up_rx.recv().await.unwrap();
        assert_eq!(update.accuracy_source(), AccuracySource::Approximate);

        drop(tx);
        assert!(up_rx.recv().await.is_none());
        assert_eq!(h.resolver.active_watches(), 0);
        assert!(!h.resolver.cancel_watch(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_resolution_leaves_cache_untouched() {
        let mut device = FakeDevice::new(
            Ok(fix(-6.1, DesiredAccuracy::Precise)),
            Ok(fix(-6.9, DesiredAccuracy::Approximate)),
        );
        device.precise_delay = Duration::from_secs(30);
        let h = harness(device, network_down(), MemoryStore::new());

        let abandoned = tokio::time::timeout(Duration::from_secs(1), h.resolver.resolve_location()).await;
        assert!(abandoned.is_err());
        assert!(h.resolver.cached().is_none());

        let c = h.resolver.resolve_location().await;
        assert_eq!(c.accuracy_source(), AccuracySource::Approximate);
        assert_eq!(h.resolver.cached().unwrap().coordinate, c);
        assert_eq!(h.device.calls(), 3);
    }
}
