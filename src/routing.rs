use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Hash algorithm served by a listen port. Selects the upstream endpoint
/// and the default difficulty-recording policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Sha256,
    Scrypt,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Sha256 => write!(f, "sha256"),
            Algorithm::Scrypt => write!(f, "scrypt"),
        }
    }
}

/// Immutable routing metadata for one listen port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Pool identity shares are attributed to (e.g. "btc", "btc-solo").
    pub pool: String,
    pub algorithm: Algorithm,
    /// Used in place of the upstream-reported difficulty when the upstream
    /// value is considered untrustworthy (see `RecordingConfig`).
    pub nominal_difficulty: f64,
}

/// One routing table entry as it appears in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEntry {
    pub port: u16,
    pub pool: String,
    pub algorithm: Algorithm,
    pub difficulty: f64,
}

/// Static listen port -> pool/algorithm/difficulty lookup.
///
/// Unrecognized ports resolve to a conservative default (`btc` / SHA256 /
/// difficulty 1) instead of refusing the connection: a misconfigured
/// listener keeps relaying rather than dropping miners on the floor.
#[derive(Debug, Clone)]
pub struct PortTable {
    entries: HashMap<u16, PortConfig>,
    fallback: PortConfig,
}

impl PortTable {
    pub fn new(entries: &[PortEntry]) -> Self {
        let entries = entries
            .iter()
            .map(|e| {
                (
                    e.port,
                    PortConfig {
                        pool: e.pool.clone(),
                        algorithm: e.algorithm,
                        nominal_difficulty: e.difficulty,
                    },
                )
            })
            .collect();

        Self {
            entries,
            fallback: PortConfig {
                pool: "btc".to_string(),
                algorithm: Algorithm::Sha256,
                nominal_difficulty: 1.0,
            },
        }
    }

    pub fn resolve(&self, port: u16) -> &PortConfig {
        self.entries.get(&port).unwrap_or(&self.fallback)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.entries.contains_key(&port)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The stock 36-port table: BTC/BCH/BC2 tiers on SHA256, LTC/DOGE tiers on
/// Scrypt, with pool and solo variants at descending share difficulties.
pub fn default_ports() -> Vec<PortEntry> {
    fn entry(port: u16, pool: &str, algorithm: Algorithm, difficulty: f64) -> PortEntry {
        PortEntry {
            port,
            pool: pool.to_string(),
            algorithm,
            difficulty,
        }
    }

    use Algorithm::{Scrypt, Sha256};

    vec![
        // SHA256 - BTC
        entry(3062, "btc", Sha256, 1000.0),
        entry(3072, "btc", Sha256, 500.0),
        entry(3082, "btc", Sha256, 100.0),
        entry(3092, "btc", Sha256, 1.0),
        entry(3102, "btc-solo", Sha256, 25000.0),
        entry(3112, "btc-solo", Sha256, 20000.0),
        entry(3122, "btc-solo", Sha256, 15000.0),
        entry(3132, "btc-solo", Sha256, 10000.0),
        // SHA256 - BCH
        entry(3063, "bch", Sha256, 500.0),
        entry(3073, "bch", Sha256, 100.0),
        entry(3083, "bch", Sha256, 10.0),
        entry(3093, "bch", Sha256, 1.0),
        entry(3068, "bch-solo", Sha256, 25000.0),
        entry(3078, "bch-solo", Sha256, 20000.0),
        entry(3088, "bch-solo", Sha256, 15000.0),
        entry(3098, "bch-solo", Sha256, 10000.0),
        // SHA256 - BC2
        entry(3264, "bc2-solo", Sha256, 1000.0),
        entry(3274, "bc2-solo", Sha256, 500.0),
        entry(3284, "bc2-solo", Sha256, 100.0),
        entry(3294, "bc2-solo", Sha256, 1.0),
        // Scrypt - LTC
        entry(3070, "ltc", Scrypt, 1024.0),
        entry(3080, "ltc", Scrypt, 256.0),
        entry(3090, "ltc", Scrypt, 64.0),
        entry(3100, "ltc", Scrypt, 16.0),
        entry(3110, "ltc-solo", Scrypt, 1024.0),
        entry(3120, "ltc-solo", Scrypt, 256.0),
        entry(3130, "ltc-solo", Scrypt, 64.0),
        entry(3140, "ltc-solo", Scrypt, 16.0),
        // Scrypt - DOGE
        entry(3069, "doge", Scrypt, 1024.0),
        entry(3079, "doge", Scrypt, 256.0),
        entry(3089, "doge", Scrypt, 64.0),
        entry(3099, "doge", Scrypt, 16.0),
        entry(3109, "doge-solo", Scrypt, 1024.0),
        entry(3119, "doge-solo", Scrypt, 256.0),
        entry(3129, "doge-solo", Scrypt, 64.0),
        entry(3139, "doge-solo", Scrypt, 16.0),
    ]
}
