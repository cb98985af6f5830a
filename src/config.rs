use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub loops: LoopsConfig,
    pub autonomous: AutonomousSection,
    pub coordination: CoordinationConfig,
    pub skills: SkillsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the JSONL collections
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cadence"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopsConfig {
    /// Directory of YAML loop definitions loaded alongside the built-ins
    pub definitions_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomousSection {
    pub tick_interval_ms: u64,
    pub max_skill_retries: u32,
    pub max_parallel_executions: usize,
}

impl Default for AutonomousSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            max_skill_retries: 3,
            max_parallel_executions: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Default reservation lifetime when the caller does not give one
    pub default_reservation_ms: i64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            default_reservation_ms: 15 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Skill id → shell command for the command skill runner
    pub commands: HashMap<String, String>,
    /// Working directory for skill commands
    pub workdir: PathBuf,
    /// Timeout per skill command in milliseconds
    pub timeout_ms: u64,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
            workdir: PathBuf::from("."),
            timeout_ms: 300_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            loops: LoopsConfig::default(),
            autonomous: AutonomousSection::default(),
            coordination: CoordinationConfig::default(),
            skills: SkillsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir
                .join(project_name)
                .join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!(
                            "Failed to load config from {}: {}",
                            primary_config.display(),
                            e
                        );
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!(
                        "Failed to load config from {}: {}",
                        fallback_config.display(),
                        e
                    );
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
