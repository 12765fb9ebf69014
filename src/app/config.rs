//! Application configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CorrelatorConfig, MethodMatch, WILDCARD_METHOD};
use crate::crypto::SessionCipher;
use crate::error::ConfigError;

/// Routes the companion app hits that are worth watching by default
pub const DEFAULT_ROUTES: &[&str] = &[
    "/user/get_bound_devices",
    "/device/bledevice_info",
    "/version/check_upgrade",
    "/healthapp/device/ot_device_upgrade",
];

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Correlator settings
    pub correlator: CorrelatorSettings,

    /// Decryption settings
    pub crypto: CryptoConfig,

    /// Routes to emit completed flows for
    pub observers: Vec<ObserverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log every completed flow, observed or not
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (enables file logging)
    pub log_file: Option<PathBuf>,

    /// Enable JSON structured logging
    pub log_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorSettings {
    /// Capacity of the capture message queue
    pub channel_capacity: usize,

    /// Evict open flows with no response after this many seconds
    pub pending_ttl_secs: Option<u64>,

    /// Upper bound on open flows
    pub max_pending: Option<usize>,

    /// Decrypt bodies on completion (token doubles as the nonce). Only for
    /// capture sources that send ciphertext bodies
    pub decrypt_bodies: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Leading RC4 keystream bytes to discard (0 or 1024 in practice)
    pub keystream_drop: usize,
}

/// One observed route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    pub route: String,

    /// HTTP method, or `*` for any
    #[serde(default = "wildcard_method")]
    pub method: String,
}

fn wildcard_method() -> String {
    WILDCARD_METHOD.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            correlator: CorrelatorSettings::default(),
            crypto: CryptoConfig::default(),
            observers: DEFAULT_ROUTES
                .iter()
                .map(|route| ObserverConfig {
                    route: route.to_string(),
                    method: wildcard_method(),
                })
                .collect(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_level: "info".to_string(),
            log_file: None,
            log_json: false,
        }
    }
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            pending_ttl_secs: None,
            max_pending: None,
            decrypt_bodies: false,
        }
    }
}

impl ObserverConfig {
    pub fn method_match(&self) -> MethodMatch {
        MethodMatch::parse(&self.method)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when the
    /// default path does not exist
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_config_path() {
                Some(p) if p.exists() => p,
                _ => {
                    tracing::info!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents =
            std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
                path: config_path.display().to_string(),
                source,
            })?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Reject values the correlator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.correlator.channel_capacity == 0 {
            return Err(invalid("correlator.channel_capacity", "must be greater than 0"));
        }

        if self.correlator.pending_ttl_secs == Some(0) {
            return Err(invalid("correlator.pending_ttl_secs", "must be greater than 0 when set"));
        }

        if self.correlator.max_pending == Some(0) {
            return Err(invalid("correlator.max_pending", "must be greater than 0 when set"));
        }

        if let Some(observer) = self.observers.iter().find(|o| o.route.is_empty()) {
            return Err(invalid(
                "observers.route",
                &format!("empty route for method '{}'", observer.method),
            ));
        }

        Ok(())
    }

    /// Correlator settings in the form the engine takes
    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            verbose: self.general.verbose,
            pending_ttl: self.correlator.pending_ttl_secs.map(Duration::from_secs),
            max_pending: self.correlator.max_pending,
            decrypt_bodies: self.correlator.decrypt_bodies,
            cipher: self.cipher(),
        }
    }

    pub fn cipher(&self) -> SessionCipher {
        SessionCipher::new(self.crypto.keystream_drop)
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "wearhook", "wearhook")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "wearhook", "wearhook")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
