//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::units::{UnitDef, UnitSystem};
use crate::core::Project;

pub const DEFAULT_CONFIDENCE: f64 = 0.95;
pub const DEFAULT_RELIABILITY: f64 = 0.95;
pub const DEFAULT_REQUIRED_PFA: f64 = 0.02;
pub const DEFAULT_REQUIRED_TUR: f64 = 4.0;
pub const DEFAULT_PRECISION: f64 = 1e-5;
pub const DEFAULT_MONTE_CARLO_SAMPLES: u32 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("invalid config in {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{key} must lie in (0, 1), got {value}")]
    OutOfRange { key: &'static str, value: f64 },
}

/// TMT configuration with layered hierarchy
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default author for new test points
    pub author: Option<String>,

    /// Default output format
    pub default_format: Option<String>,

    pub confidence: Option<f64>,
    pub reliability: Option<f64>,
    pub required_pfa: Option<f64>,
    pub required_tur: Option<f64>,

    /// Solver PFA precision
    pub precision: Option<f64>,

    pub monte_carlo_samples: Option<u32>,

    /// Extra unit symbols, appended to the built-in table
    pub units: BTreeMap<String, UnitDef>,
}

impl Config {
    /// Load configuration from all sources, merging in priority order.
    /// Unreadable layers are skipped with a warning.
    pub fn load() -> Self {
        let mut config = Config::default();

        // 1. Built-in defaults (accessor fallbacks)

        // 2. Global user config (~/.config/tmt/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                match Self::from_file(&global_path) {
                    Ok(global) => config.merge(global),
                    Err(e) => tracing::warn!(error = %e, "ignoring global config"),
                }
            }
        }

        // 3. Project config (.tmt/config.yaml)
        if let Ok(project) = Project::discover() {
            let project_config_path = project.tmt_dir().join("config.yaml");
            if project_config_path.exists() {
                match Self::from_file(&project_config_path) {
                    Ok(project_config) => config.merge(project_config),
                    Err(e) => tracing::warn!(error = %e, "ignoring project config"),
                }
            }
        }

        // 4. Environment variables
        config.merge_env(|key| std::env::var(key).ok());

        config
    }

    /// Parse one YAML layer
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Config = serde_yml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tmt")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    fn merge_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(author) = var("TMT_AUTHOR") {
            self.author = Some(author);
        }
        let parse = |key: &str| var(key).and_then(|v| v.trim().parse::<f64>().ok());
        if let Some(v) = parse("TMT_CONFIDENCE") {
            self.confidence = Some(v);
        }
        if let Some(v) = parse("TMT_RELIABILITY") {
            self.reliability = Some(v);
        }
        if let Some(v) = parse("TMT_REQUIRED_PFA") {
            self.required_pfa = Some(v);
        }
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        if other.author.is_some() {
            self.author = other.author;
        }
        if other.default_format.is_some() {
            self.default_format = other.default_format;
        }
        if other.confidence.is_some() {
            self.confidence = other.confidence;
        }
        if other.reliability.is_some() {
            self.reliability = other.reliability;
        }
        if other.required_pfa.is_some() {
            self.required_pfa = other.required_pfa;
        }
        if other.required_tur.is_some() {
            self.required_tur = other.required_tur;
        }
        if other.precision.is_some() {
            self.precision = other.precision;
        }
        if other.monte_carlo_samples.is_some() {
            self.monte_carlo_samples = other.monte_carlo_samples;
        }
        for (symbol, def) in other.units {
            self.units.insert(symbol, def);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let probabilities = [
            ("confidence", self.confidence),
            ("reliability", self.reliability),
            ("required_pfa", self.required_pfa),
        ];
        for (key, value) in probabilities {
            if let Some(v) = value {
                if !(v > 0.0 && v < 1.0) {
                    return Err(ConfigError::OutOfRange { key, value: v });
                }
            }
        }
        Ok(())
    }

    pub fn confidence(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }

    pub fn reliability(&self) -> f64 {
        self.reliability.unwrap_or(DEFAULT_RELIABILITY)
    }

    pub fn required_pfa(&self) -> f64 {
        self.required_pfa.unwrap_or(DEFAULT_REQUIRED_PFA)
    }

    pub fn required_tur(&self) -> f64 {
        self.required_tur.unwrap_or(DEFAULT_REQUIRED_TUR)
    }

    pub fn precision(&self) -> f64 {
        self.precision.unwrap_or(DEFAULT_PRECISION)
    }

    pub fn monte_carlo_samples(&self) -> u32 {
        self.monte_carlo_samples.unwrap_or(DEFAULT_MONTE_CARLO_SAMPLES)
    }

    /// Unit table with any configured extras
    pub fn unit_system(&self) -> UnitSystem {
        if self.units.is_empty() {
            UnitSystem::standard()
        } else {
            UnitSystem::with_extra(&self.units)
        }
    }

    /// Get the author name, falling back to git config or username
    pub fn author(&self) -> String {
        if let Some(ref author) = self.author {
            return author.clone();
        }

        if let Ok(output) = std::process::Command::new("git")
            .args(["config", "user.name"])
            .output()
        {
            if output.status.success() {
                let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !name.is_empty() {
                    return name;
                }
            }
        }

        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::UnitConverter;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.confidence(), 0.95);
        assert_eq!(config.reliability(), 0.95);
        assert_eq!(config.required_pfa(), 0.02);
        assert_eq!(config.required_tur(), 4.0);
        assert_eq!(config.monte_carlo_samples(), 100_000);
    }

    #[test]
    fn test_merge_prefers_later_layer() {
        let mut base: Config = serde_yml::from_str("confidence: 0.99\nauthor: alice\n").unwrap();
        let project: Config = serde_yml::from_str("confidence: 0.9545\n").unwrap();
        base.merge(project);
        assert_eq!(base.confidence(), 0.9545);
        assert_eq!(base.author.as_deref(), Some("alice"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.merge_env(|key| match key {
            "TMT_RELIABILITY" => Some("0.9".to_string()),
            "TMT_REQUIRED_PFA" => Some(" 0.01 ".to_string()),
            "TMT_CONFIDENCE" => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.reliability(), 0.9);
        assert_eq!(config.required_pfa(), 0.01);
        assert_eq!(config.confidence(), 0.95);
    }

    #[test]
    fn test_from_file_rejects_bad_probability() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "reliability: 1.5\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: "reliability", .. }));
    }

    #[test]
    fn test_extra_units() {
        let yaml = "units:\n  tf:\n    to_si: 9806.65\n    quantity: Force\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        let units = config.unit_system();
        let n = units.convert(1.0, "tf", "kN").unwrap();
        assert!((n - 9.80665).abs() < 1e-9);
    }
}
