//! Configuration handling for the tether service.
//!
//! Deployment addresses come from an optional YAML file with
//! environment-variable overrides applied on top; command-line flags take
//! precedence over both.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Tether service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Address the echo server listens on, e.g. "127.0.0.1:8080"
    pub listen: Option<String>,
    /// WebSocket endpoint the client maintains a link to,
    /// e.g. "ws://127.0.0.1:8080/echo"
    pub endpoint: Option<String>,
}

impl TetherConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<TetherConfig>(&content) {
                Ok(parsed) => {
                    config = parsed;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            info!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(listen) = std::env::var("TETHER_LISTEN") {
            info!("Listen address overridden by environment: {}", listen);
            self.listen = Some(listen);
        }

        if let Ok(endpoint) = std::env::var("TETHER_ENDPOINT") {
            info!("Endpoint overridden by environment: {}", endpoint);
            self.endpoint = Some(endpoint);
        }
    }
}
