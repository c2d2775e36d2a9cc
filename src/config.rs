use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::events::bus::DEFAULT_CAPACITY;

/// Main configuration structure for FeatureFlow
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FeatureFlowConfig {
    /// Event bus settings
    pub event_bus: EventBusConfig,
    /// State machine channel sizes
    pub state_machine: StateMachineConfig,
    /// Logging and metrics settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EventBusConfig {
    /// Queue slots per subscription
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Buffered external events before slow features start lagging
    pub external_event_capacity: usize,
    /// Buffered response values per machine
    pub response_capacity: usize,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            external_event_capacity: 64,
            response_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, used when RUST_LOG is unset
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Log engine counters on shutdown
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl FeatureFlowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (featureflow.toml)
    /// 3. Environment variables (FEATUREFLOW_SECTION__KEY)
    pub fn load() -> Result<Self> {
        Self::build(Path::new("featureflow.toml"))
    }

    /// Same layering as [`FeatureFlowConfig::load`] with an explicit file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
        Self::build(path)
    }

    fn build(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("FEATUREFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<FeatureFlowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = FeatureFlowConfig::load_env_file();
        FeatureFlowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static FeatureFlowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let config = config()?;
    tracing::info!(
        bus_capacity = config.event_bus.capacity,
        log_level = %config.observability.log_level,
        "Configuration loaded successfully"
    );
    Ok(())
}
