//! The entry point hosts hold onto.
//!
//! A provider owns the connection pool and the garbage collector, and
//! stamps out region handles over them. Hosts that configure regions by
//! name and string properties go through [`CacheProvider::build_region`];
//! hosts that want the concrete types (for the typed helpers or the
//! versioned surface) use the direct constructors.

use crate::error::{CacheError, CacheResult};
use crate::gc::{GarbageCollector, GcMetricsSnapshot};
use crate::generational::GenerationalRegion;
use crate::namespace::RegionNamespace;
use crate::pinned::PinnedRegion;
use crate::region::{CacheRegion, RegionCore};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{
    BincodeCodec, Codec, ProviderSettings, RegionOptions, RegionStrategy, Timestamper,
};
use strata_store::{ConnectionPool, MemoryStore, PoolOptions, StoreClient};
use tracing::info;

/// Shared plumbing for every region a process uses.
pub struct CacheProvider<S: StoreClient, C: Codec + Clone + 'static = BincodeCodec> {
    settings: ProviderSettings,
    codec: C,
    pool: Arc<ConnectionPool<S>>,
    collector: GarbageCollector<S>,
}

impl CacheProvider<MemoryStore, BincodeCodec> {
    /// A provider over the process-wide in-memory store. Every provider
    /// built this way shares one keyspace, like separate clients of one
    /// external store.
    pub fn memory() -> CacheResult<Self> {
        CacheProvider::new(
            MemoryStore::shared(),
            ProviderSettings::default(),
            BincodeCodec,
        )
    }
}

impl<S: StoreClient, C: Codec + Clone + 'static> CacheProvider<S, C> {
    pub fn new(client: S, settings: ProviderSettings, codec: C) -> CacheResult<Self> {
        let pool_options = PoolOptions::default()
            .with_max_size(settings.max_write_pool_size)
            .with_checkout_timeout(settings.checkout_timeout);
        let pool = Arc::new(ConnectionPool::new(&client, pool_options)?);
        let collector = GarbageCollector::new(client);
        info!(
            host = settings.host,
            port = settings.port,
            pool = settings.max_write_pool_size,
            "provider ready"
        );
        Ok(CacheProvider {
            settings,
            codec,
            pool,
            collector,
        })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Start background reclamation. Paired with [`stop`]; calls nest.
    ///
    /// [`stop`]: CacheProvider::stop
    pub fn start(&self) -> CacheResult<()> {
        self.collector.start()
    }

    pub fn stop(&self) -> CacheResult<()> {
        self.collector.stop()
    }

    pub fn collector_metrics(&self) -> GcMetricsSnapshot {
        self.collector.metrics()
    }

    pub fn collector(&self) -> &GarbageCollector<S> {
        &self.collector
    }

    /// A process-wide monotonic timestamp, shared by every region.
    pub fn next_timestamp(&self) -> i64 {
        Timestamper::global().next()
    }

    /// Build a region from host-supplied string properties, routed by
    /// the configured strategy.
    pub fn build_region(
        &self,
        region_name: &str,
        properties: &HashMap<String, String>,
    ) -> CacheResult<Box<dyn CacheRegion>> {
        let options = RegionOptions::from_properties(properties)?;
        match options.strategy {
            RegionStrategy::Generational => Ok(Box::new(
                self.generational_region_with(region_name, options)?,
            )),
            RegionStrategy::Pinned => Ok(Box::new(self.pinned_region_with(region_name, options)?)),
        }
    }

    pub fn generational_region(
        &self,
        region_name: &str,
    ) -> CacheResult<GenerationalRegion<S, C>> {
        self.generational_region_with(region_name, RegionOptions::default())
    }

    pub fn generational_region_with(
        &self,
        region_name: &str,
        options: RegionOptions,
    ) -> CacheResult<GenerationalRegion<S, C>> {
        Ok(GenerationalRegion::open(
            self.make_core(region_name, options)?,
        ))
    }

    pub fn pinned_region(&self, region_name: &str) -> CacheResult<PinnedRegion<S, C>> {
        self.pinned_region_with(
            region_name,
            RegionOptions::default().with_strategy(RegionStrategy::Pinned),
        )
    }

    pub fn pinned_region_with(
        &self,
        region_name: &str,
        options: RegionOptions,
    ) -> CacheResult<PinnedRegion<S, C>> {
        Ok(PinnedRegion::open(self.make_core(region_name, options)?))
    }

    fn make_core(
        &self,
        region_name: &str,
        options: RegionOptions,
    ) -> CacheResult<RegionCore<S, C>> {
        if region_name.is_empty() {
            return Err(CacheError::InvalidArgument {
                what: "region name",
            });
        }
        // The prefix keeps applications sharing one store out of each
        // other's regions.
        let namespace = match &options.prefix {
            Some(prefix) => format!("{}_{}", prefix, region_name),
            None => region_name.to_string(),
        };
        Ok(RegionCore::new(
            region_name,
            RegionNamespace::new(&namespace),
            Arc::clone(&self.pool),
            self.codec.clone(),
            options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider() -> CacheProvider<MemoryStore, BincodeCodec> {
        CacheProvider::new(MemoryStore::new(), ProviderSettings::default(), BincodeCodec).unwrap()
    }

    fn make_properties(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_build_region_routes_by_strategy() {
        let provider = make_provider();

        let generational = provider
            .build_region("orders", &make_properties(&[]))
            .unwrap();
        generational.put("k", b"v").unwrap();
        generational.clear().unwrap();
        assert_eq!(generational.get("k").unwrap(), None);

        let pinned = provider
            .build_region("static", &make_properties(&[("strategy", "pinned")]))
            .unwrap();
        pinned.put("k", b"v").unwrap();
        assert!(matches!(
            pinned.clear(),
            Err(CacheError::ClearUnsupported { .. })
        ));
    }

    #[test]
    fn test_build_region_rejects_empty_name() {
        let provider = make_provider();
        let got = provider.build_region("", &HashMap::new());
        assert!(matches!(
            got,
            Err(CacheError::InvalidArgument { what: "region name" })
        ));
    }

    #[test]
    fn test_build_region_rejects_bad_properties() {
        let provider = make_provider();
        let got = provider.build_region("orders", &make_properties(&[("strategy", "sometimes")]));
        assert!(matches!(got, Err(CacheError::Config { .. })));
    }

    #[test]
    fn test_prefixed_regions_are_isolated() {
        let store = MemoryStore::new();
        let provider_a =
            CacheProvider::new(store.clone(), ProviderSettings::default(), BincodeCodec).unwrap();
        let provider_b =
            CacheProvider::new(store, ProviderSettings::default(), BincodeCodec).unwrap();

        let region_a = provider_a
            .build_region("orders", &make_properties(&[("region_prefix", "app1")]))
            .unwrap();
        let region_b = provider_b
            .build_region("orders", &make_properties(&[("region_prefix", "app2")]))
            .unwrap();

        region_a.put("k", b"from-a").unwrap();
        assert_eq!(region_b.get("k").unwrap(), None);
        region_b.put("k", b"from-b").unwrap();
        assert_eq!(region_a.get("k").unwrap(), Some(b"from-a".to_vec()));
    }

    #[test]
    fn test_lifecycle_delegates_to_collector() {
        let provider = make_provider();
        assert!(!provider.collector().is_running());
        provider.start().unwrap();
        provider.start().unwrap();
        provider.stop().unwrap();
        assert!(provider.collector().is_running());
        provider.stop().unwrap();
        assert!(!provider.collector().is_running());
    }

    #[test]
    fn test_timestamps_increase() {
        let provider = make_provider();
        let first = provider.next_timestamp();
        let second = provider.next_timestamp();
        assert!(second > first);
    }
}
