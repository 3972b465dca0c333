//! Convenience constructor for [`crate::manager::ProcessConfig`]: fills in
//! the defaults a caller almost always wants (working directory, inherited
//! environment) and delegates to the singleton façade, the way
//! `spawn_complex_process`'s optional `working_dir` defaulting works in
//! this library's process manager.

use std::env;

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::types::pathtype::PathType;

use crate::facade;
use crate::manager::ProcessConfig;

/// An option function applied to a [`ProcessConfig`] before it is
/// registered, in the style of `WithWorkingDir`/`WithEnv` from `spec.md`.
pub type ConfigOption = Box<dyn FnOnce(&mut ProcessConfig)>;

pub fn with_working_dir(dir: PathType) -> ConfigOption {
    Box::new(move |config| config.working_dir = Some(dir))
}

pub fn with_env(key: impl Into<String>, value: impl Into<String>) -> ConfigOption {
    let key = key.into();
    let value = value.into();
    Box::new(move |config| config.env.push((key, value)))
}

/// Builds a [`ProcessConfig`] with the working directory defaulted to `.`
/// and the environment defaulted to a copy of the supervisor's own
/// environment, then applies `options` in order.
pub fn new_config(name: &str, command: PathType, args: Vec<String>, options: Vec<ConfigOption>) -> ProcessConfig {
    let mut config = ProcessConfig::new(name, command, args);
    config.working_dir = Some(PathType::Str(".".into()));
    config.env = env::vars().collect();

    for option in options {
        option(&mut config);
    }

    config
}

/// Registers and starts `name` via the singleton façade, rejecting a
/// caller-supplied config with an empty name rather than silently
/// registering an unaddressable process.
pub async fn start(name: &str, config: Option<ProcessConfig>) -> Result<(), ErrorArrayItem> {
    let mut config = config.ok_or_else(|| {
        ErrorArrayItem::new(Errors::GeneralError, format!("start {}: process config is required", name))
    })?;

    if config.working_dir.is_none() {
        config.working_dir = Some(PathType::Str(".".into()));
    }
    if config.env.is_empty() {
        config.env = env::vars().collect();
    }

    facade::register_and_start(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_defaults_working_dir_and_inherits_environment() {
        let config = supervisor_config();
        assert_eq!(config.working_dir.map(|d| d.to_path_buf()), Some(".".into()));
        assert!(!config.env.is_empty());
    }

    #[test]
    fn options_apply_in_order() {
        let config = new_config(
            "svc",
            PathType::Str("/bin/true".into()),
            vec![],
            vec![with_working_dir(PathType::Str("/tmp".into())), with_env("FOO", "bar")],
        );
        assert_eq!(config.working_dir.map(|d| d.to_path_buf()), Some("/tmp".into()));
        assert!(config.env.contains(&("FOO".to_owned(), "bar".to_owned())));
    }

    fn supervisor_config() -> ProcessConfig {
        new_config("svc", PathType::Str("/bin/true".into()), vec![], vec![])
    }

    #[tokio::test]
    async fn start_rejects_a_missing_config() {
        let result = start("no-config", None).await;
        assert!(result.is_err());
    }
}
