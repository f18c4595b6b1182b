//! The catalog service.
//!
//! [`Catalog`] ties a [`CatalogStore`] to the bag parser, the location
//! resolver and a status sink, and owns the single write lock that every
//! catalog mutation runs under. Its operations are split by concern:
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`reconcile`](crate::reconcile) | `reconcile_file` (insert / relocate / refresh / duplicate) |
//! | [`scan`](crate::scan) | `snapshot`, `scan`, `mark_missing` |
//! | [`maintenance`](crate::maintenance) | purge, prune, edit, remove, track refresh |
//!
//! Expensive work (hashing, parsing, geocoding) happens before the lock is
//! taken; only the decide-and-write step is serialized.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, MutexGuard};

use bag_catalog_core::store::CatalogStore;

use crate::bag::{BagParser, RosBagReader};
use crate::config::Config;
use crate::geocode::{create_resolver, DisabledResolver, LocationResolver};
use crate::status::{NoStatus, StatusEvent, StatusSink};

pub struct Catalog {
    pub(crate) store: Arc<dyn CatalogStore>,
    pub(crate) parser: Arc<dyn BagParser>,
    pub(crate) resolver: Arc<dyn LocationResolver>,
    pub(crate) status: Arc<dyn StatusSink>,
    pub(crate) heartbeat: Duration,
    write_lock: Mutex<()>,
}

impl Catalog {
    /// A catalog over `store` with the ROS bag reader, no geocoding and no
    /// status output.
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            parser: Arc::new(RosBagReader),
            resolver: Arc::new(DisabledResolver),
            status: Arc::new(NoStatus),
            heartbeat: Duration::from_secs(3),
            write_lock: Mutex::new(()),
        }
    }

    /// A catalog configured from `[scan]` and `[geocoding]`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CatalogStore>,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        Ok(Self::new(store)
            .with_resolver(create_resolver(&config.geocoding)?)
            .with_status(status)
            .with_heartbeat(Duration::from_secs(config.scan.heartbeat_secs)))
    }

    pub fn with_parser(mut self, parser: Arc<dyn BagParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LocationResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Acquire the catalog write lock.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) fn report(&self, event: StatusEvent) {
        self.status.report(event);
    }
}
