//! Dispatcher builder from YAML configuration.
//!
//! This module turns a [`ConfigFile`] into a [`Dispatcher`] with every job
//! registered.

use std::path::Path;

use crate::core::system::SystemInfo;
use crate::dispatcher::Dispatcher;

use super::error::ConfigError;
use super::types::ConfigFile;
use super::yaml::YamlLoader;

/// Builder for creating Dispatchers from configuration files.
pub struct DispatcherBuilder;

impl DispatcherBuilder {
    /// Register the jobs of `config` on `dispatcher`.
    ///
    /// The file's defaults are merged into the dispatcher's before any job
    /// is added.
    pub fn apply(dispatcher: &mut Dispatcher, config: ConfigFile) -> Result<(), ConfigError> {
        dispatcher.set_defaults(config.defaults);
        for entry in config.jobs {
            dispatcher.add(entry.name, entry.config)?;
        }
        Ok(())
    }

    /// Build a new dispatcher for `system` from `config`.
    pub fn build(config: ConfigFile, system: SystemInfo) -> Result<Dispatcher, ConfigError> {
        let mut dispatcher = Dispatcher::with_system(system);
        Self::apply(&mut dispatcher, config)?;
        Ok(dispatcher)
    }
}

/// Load a configuration file into a dispatcher for the current host.
pub fn load_dispatcher_from_file(path: impl AsRef<Path>) -> Result<Dispatcher, ConfigError> {
    let config = YamlLoader::load_file(path)?;
    DispatcherBuilder::build(config, SystemInfo::detect())
}
