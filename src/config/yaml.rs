//! YAML configuration parsing.
//!
//! Parses defaults and job definitions from YAML files.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::ConfigFile;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a configuration file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<ConfigFile, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ConfigFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse a configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<ConfigFile, ConfigError> {
        let config: ConfigFile = serde_yaml::from_str(yaml).map_err(ConfigError::YamlError)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Check every schedule in `config` parses.
    ///
    /// Loading does not do this so that a single broken schedule does not
    /// stop the other jobs from running.
    pub fn check_schedules(config: &ConfigFile) -> Result<(), ConfigError> {
        for entry in &config.jobs {
            if let Some(schedule) = entry.config.schedule() {
                schedule
                    .validate()
                    .map_err(|source| ConfigError::InvalidSchedule {
                        job: entry.name.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    fn validate(config: &ConfigFile) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for entry in &config.jobs {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::MissingField("name".into()));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job name: {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
