use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ladder::LadderConfig;
use crate::scheduler::SweepConfig;
use crate::session::SessionConfig;
use crate::sim::CellModel;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ladder: LadderConfig,
    pub sweep: SweepConfig,
    pub session: SessionConfig,
    pub simulation: SimulationConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub listen_ip: String,
    pub listen_port: u16,
}

/// Parameters of the simulated front end used when no hardware is attached.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulationConfig {
    pub cell: CellModel,
    pub excitation_volts: f64,
    pub noise_volts: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    pub csv_dir: String,
    pub csv_header: bool,
    pub jsonl_path: Option<String>,
    /// Render a terminal magnitude plot after each completed sweep.
    pub plot: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ladder: LadderConfig::default(),
            sweep: SweepConfig::default(),
            session: SessionConfig::default(),
            simulation: SimulationConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 5005,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cell: CellModel::default(),
            excitation_volts: 1.0,
            noise_volts: 1e-5,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_dir: "./eis_data".to_string(),
            csv_header: false,
            jsonl_path: None,
            plot: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration from file with layered fallbacks
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else {
        // Try common config file locations
        let possible_paths = ["config.toml", "eis_rig.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    // Add environment variable overrides with prefix "EIS_RIG_"
    builder = builder.add_source(
        Environment::with_prefix("EIS_RIG")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize::<AppConfig>()
}

/// Load configuration with better error handling and defaults
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}
