use std::sync::Arc;

use crate::config::Config;
use crate::routing::PortTable;
use crate::services::sink::ShareRecorder;
use crate::services::stats::ClusterStats;
use crate::services::sync::PoolDataCache;

/// Central coordinator shared by the listeners and every session: the
/// configuration, the routing table, the cluster counters, the share
/// recorder, and the pool network-data cache.
#[derive(Debug, Clone)]
pub struct Manager {
    config: Arc<Config>,
    routing: Arc<PortTable>,
    stats: Arc<ClusterStats>,
    recorder: ShareRecorder,
    pool_data: Arc<PoolDataCache>,
}

impl Manager {
    pub fn new(config: Arc<Config>, recorder: ShareRecorder) -> Self {
        let routing = Arc::new(PortTable::new(&config.ports));

        Self {
            config,
            routing,
            stats: Arc::new(ClusterStats::new()),
            recorder,
            pool_data: Arc::new(PoolDataCache::default()),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn routing(&self) -> &Arc<PortTable> {
        &self.routing
    }

    pub fn stats(&self) -> &Arc<ClusterStats> {
        &self.stats
    }

    pub fn recorder(&self) -> &ShareRecorder {
        &self.recorder
    }

    pub fn pool_data(&self) -> &Arc<PoolDataCache> {
        &self.pool_data
    }
}
