use std::collections::HashSet;

use crate::config::types::Config;
use crate::error::ConfigError;

impl Config {
    /// Validate the configuration at startup. Listener binding and upstream
    /// reachability are runtime concerns; this catches what is knowably
    /// wrong before any socket is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(invalid("ports", "at least one listen port is required"));
        }

        let mut seen = HashSet::new();
        for entry in &self.ports {
            if !seen.insert(entry.port) {
                return Err(invalid(
                    "ports",
                    format!("port {} appears more than once", entry.port),
                ));
            }
            if entry.pool.trim().is_empty() {
                return Err(invalid(
                    "ports",
                    format!("port {} has an empty pool id", entry.port),
                ));
            }
            if !entry.difficulty.is_finite() || entry.difficulty <= 0.0 {
                return Err(invalid(
                    "ports",
                    format!("port {} difficulty must be a positive number", entry.port),
                ));
            }
        }

        validate_endpoint("upstream.sha256", &self.upstream.sha256)?;
        validate_endpoint("upstream.scrypt", &self.upstream.scrypt)?;

        if self.upstream.username.trim().is_empty() {
            return Err(invalid("upstream.username", "must not be empty"));
        }

        if self.server.max_line_length < 256 {
            return Err(invalid(
                "server.max_line_length",
                "below the size of a minimal submit line",
            ));
        }

        if self.sync.fallback_pool.trim().is_empty() {
            return Err(invalid("sync.fallback_pool", "must not be empty"));
        }

        Ok(())
    }
}

fn validate_endpoint(field: &str, endpoint: &str) -> Result<(), ConfigError> {
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse::<u16>()
                .map_err(|_| invalid(field, format!("invalid port in '{endpoint}'")))?;
            Ok(())
        }
        _ => Err(invalid(field, format!("expected host:port, got '{endpoint}'"))),
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}
