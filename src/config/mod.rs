//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for defaults and jobs.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{DispatcherBuilder, load_dispatcher_from_file};
pub use error::ConfigError;
pub use types::{ConfigFile, JobEntry};
pub use yaml::YamlLoader;
