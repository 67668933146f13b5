use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, StratumError};

/// Last known block height and network difficulty per pool id, refreshed
/// from the pool API. Read by every session when it builds share events;
/// written only by the sync task.
#[derive(Debug, Default)]
pub struct PoolDataCache {
    heights: DashMap<String, u64>,
    difficulties: DashMap<String, f64>,
}

impl PoolDataCache {
    /// Height for `pool`, falling back to the configured default pool.
    /// `None` means no fresh data exists anywhere; callers degrade to zero.
    pub fn block_height(&self, pool: &str, fallback: &str) -> Option<u64> {
        self.heights
            .get(pool)
            .or_else(|| self.heights.get(fallback))
            .map(|entry| *entry)
    }

    pub fn network_difficulty(&self, pool: &str, fallback: &str) -> Option<f64> {
        self.difficulties
            .get(pool)
            .or_else(|| self.difficulties.get(fallback))
            .map(|entry| *entry)
    }

    pub fn set_height(&self, pool: &str, height: u64) {
        self.heights.insert(pool.to_string(), height);
    }

    pub fn set_difficulty(&self, pool: &str, difficulty: f64) {
        self.difficulties.insert(pool.to_string(), difficulty);
    }

    pub fn tracked_pools(&self) -> usize {
        self.heights.len()
    }
}

#[derive(Debug, Deserialize)]
struct PoolApiResponse {
    #[serde(default)]
    pools: Vec<PoolApiEntry>,
}

#[derive(Debug, Deserialize)]
struct PoolApiEntry {
    id: Option<String>,
    #[serde(rename = "networkStats")]
    network_stats: Option<NetworkStatsBody>,
}

#[derive(Debug, Deserialize)]
struct NetworkStatsBody {
    #[serde(rename = "blockHeight")]
    block_height: Option<u64>,
    #[serde(rename = "networkDifficulty")]
    network_difficulty: Option<f64>,
}

/// Periodically pull block heights and network difficulties for every pool
/// the API reports. Fetch failures are logged and skipped; stale data stays
/// in the cache until the API answers again.
pub fn spawn_sync(cache: Arc<PoolDataCache>, config: SyncConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("pool sync disabled: failed to build HTTP client: {}", e);
                return;
            }
        };

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match fetch_once(&client, &config.pool_api_url, &cache).await {
                Ok(updated) => {
                    debug!("pool sync updated {} pools", updated);
                }
                Err(e) => {
                    warn!("pool sync failed: {}", e);
                }
            }
        }
    })
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    cache: &PoolDataCache,
) -> Result<usize> {
    let response = client.get(url).send().await.map_err(sync_error)?;
    let body: PoolApiResponse = response.json().await.map_err(sync_error)?;

    let mut updated = 0;
    for pool in body.pools {
        let (Some(id), Some(stats)) = (pool.id, pool.network_stats) else {
            continue;
        };

        if let Some(height) = stats.block_height {
            cache.set_height(&id, height);
        }
        if let Some(difficulty) = stats.network_difficulty {
            cache.set_difficulty(&id, difficulty);
        }
        updated += 1;
    }

    Ok(updated)
}

fn sync_error(e: reqwest::Error) -> StratumError {
    StratumError::Sync {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_default_pool() {
        let cache = PoolDataCache::default();
        cache.set_height("btc", 850_000);
        cache.set_difficulty("btc", 9.0e13);

        // Pool with no data of its own borrows the fallback's.
        assert_eq!(cache.block_height("bch-solo", "btc"), Some(850_000));
        assert_eq!(cache.network_difficulty("bch-solo", "btc"), Some(9.0e13));

        // Pool with its own data wins.
        cache.set_height("bch-solo", 860_000);
        assert_eq!(cache.block_height("bch-solo", "btc"), Some(860_000));
    }

    #[test]
    fn empty_cache_yields_none() {
        let cache = PoolDataCache::default();
        assert_eq!(cache.block_height("btc", "btc"), None);
        assert_eq!(cache.network_difficulty("ltc", "btc"), None);
    }

    #[test]
    fn api_body_parses_with_partial_stats() {
        let body: PoolApiResponse = serde_json::from_str(
            r#"{
                "pools": [
                    {"id": "btc", "networkStats": {"blockHeight": 850000, "networkDifficulty": 9e13}},
                    {"id": "ltc", "networkStats": {"blockHeight": 2700000}},
                    {"id": "broken"},
                    {"networkStats": {"blockHeight": 1}}
                ]
            }"#,
        )
        .unwrap();

        let cache = PoolDataCache::default();
        let mut updated = 0;
        for pool in body.pools {
            if let (Some(id), Some(stats)) = (pool.id, pool.network_stats) {
                if let Some(h) = stats.block_height {
                    cache.set_height(&id, h);
                }
                if let Some(d) = stats.network_difficulty {
                    cache.set_difficulty(&id, d);
                }
                updated += 1;
            }
        }

        assert_eq!(updated, 2);
        assert_eq!(cache.block_height("ltc", "btc"), Some(2_700_000));
        assert_eq!(cache.network_difficulty("ltc", "btc"), Some(9.0e13));
    }
}
