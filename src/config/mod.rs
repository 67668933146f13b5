pub mod types;
pub mod validation;

pub use types::{
    ApiConfig, Config, DatabaseConfig, DifficultySource, RecordingConfig, RewriteConfig,
    ServerConfig, SyncConfig, UpstreamConfig,
};
