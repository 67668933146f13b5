use thiserror::Error;

/// Error types for the bridge.
///
/// Transport errors terminate a session; decode errors never do (the raw
/// line is forwarded instead); sink and sync errors are logged and dropped.
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("connection error: {message}")]
    Connection {
        message: String,
        remote_addr: Option<std::net::SocketAddr>,
    },

    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        method: Option<String>,
    },

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("pool sync error: {message}")]
    Sync { message: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<std::io::Error> for StratumError {
    fn from(e: std::io::Error) -> Self {
        StratumError::Network {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StratumError>;
