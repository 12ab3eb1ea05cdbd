use serde::{Deserialize, Serialize};

/// Construction-time settings for the core. Config-file parsing and CLI flags
/// are out of scope — this struct is meant to be built directly by an
/// embedding caller, with [`SilmarilConfig::from_env`] as a convenience for
/// the minimal environment surface the core reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilmarilConfig {
    /// Overrides the base directory; otherwise `<home>/.silmaril`.
    pub home: Option<String>,
    pub dht_port: u16,
    pub bootstrap_nodes: Vec<String>,
    pub max_download_rate_bps: Option<u64>,
    pub max_upload_rate_bps: Option<u64>,
    pub default_piece_length: u32,
    pub catalog_piece_length: u32,
}

impl Default for SilmarilConfig {
    fn default() -> Self {
        Self {
            home: None,
            dht_port: 6881,
            bootstrap_nodes: Vec::new(),
            max_download_rate_bps: None,
            max_upload_rate_bps: None,
            default_piece_length: 4 * 1024 * 1024,
            catalog_piece_length: 256 * 1024,
        }
    }
}

impl SilmarilConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(home) = std::env::var("SILMARIL_HOME") {
            config.home = Some(home);
        }

        if let Ok(port) = std::env::var("SILMARIL_DHT_PORT") {
            if let Ok(port) = port.parse() {
                config.dht_port = port;
            }
        }

        config
    }
}
