//! Layered configuration builder
//!
//! Built-in defaults form the bottom layer. Files are merged over them in the
//! order they were added, then prefixed environment variables, then explicit
//! overrides. The merged result is validated before it is returned.

use crate::{Config, ConfigError, ConfigFormat, ConfigResult};
use config::{Environment, File};
use ferrosync_types::{ItemsPerRequest, SampleLimit};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone)]
struct FileLayer {
    path: PathBuf,
    format: ConfigFormat,
    required: bool,
}

/// Builder merging defaults, files, environment and overrides into a [`Config`]
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    files: Vec<FileLayer>,
    env_prefix: Option<String>,
    overrides: Vec<(String, String)>,
}

impl ConfigBuilder {
    /// Builder holding only the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `path` when it exists, skip it otherwise
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.push_file(path.as_ref(), false)
    }

    /// Merge `path`, failing the build when it cannot be read
    pub fn with_required_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.push_file(path.as_ref(), true)
    }

    /// Merge variables named `<PREFIX>__<SECTION>__<KEY>`
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Force a dotted key to a value, above every other layer
    pub fn with_override<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    fn push_file(mut self, path: &Path, required: bool) -> Self {
        self.files.push(FileLayer {
            path: path.to_path_buf(),
            format: ConfigFormat::from_path(path),
            required,
        });
        self
    }

    /// Merge every layer and validate the result
    pub fn build(self) -> ConfigResult<Config> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut layers = config::Config::builder().add_source(defaults);

        for file in &self.files {
            if !file.path.exists() {
                if file.required {
                    return Err(ConfigError::read(
                        &file.path,
                        std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                    ));
                }
                continue;
            }
            layers = layers.add_source(File::from(file.path.as_path()).format(file.format.into()));
        }

        if let Some(prefix) = &self.env_prefix {
            layers = layers.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        for (key, value) in self.overrides {
            layers = layers.set_override(key, value)?;
        }

        let config: Config = layers.build()?.try_deserialize()?;
        validate(&config)?;
        Ok(config)
    }
}

/// Check ranges and uniqueness that deserialization alone cannot enforce
pub fn validate(config: &Config) -> ConfigResult<()> {
    let items = config.sync.items_per_request.get();
    if ItemsPerRequest::new(items).is_err() {
        return Err(ConfigError::invalid_value(
            "sync.items_per_request",
            format!(
                "{} is outside {}..={}",
                items,
                ItemsPerRequest::MIN,
                ItemsPerRequest::MAX
            ),
        ));
    }

    let mut ordered = HashSet::new();
    if let Some(repeated) = config
        .sync
        .sync_order
        .iter()
        .find(|type_name| !ordered.insert(type_name.as_str()))
    {
        return Err(ConfigError::invalid_value(
            "sync.sync_order",
            format!("{} is listed more than once", repeated),
        ));
    }

    if config.manager.poll_interval_ms == 0 {
        return Err(ConfigError::invalid_value(
            "manager.poll_interval_ms",
            "must be greater than 0",
        ));
    }

    let samples = config.manager.average_samples.get();
    if SampleLimit::new(samples).is_err() {
        return Err(ConfigError::invalid_value(
            "manager.average_samples",
            format!("{} is outside {}..={}", samples, SampleLimit::MIN, SampleLimit::MAX),
        ));
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.level",
            format!("expected one of {}", LOG_LEVELS.join(", ")),
        ));
    }

    let mut names = HashSet::new();
    for profile in &config.profiles {
        let name = profile.name.trim();
        if name.is_empty() {
            return Err(ConfigError::missing_required("profiles.name"));
        }
        if !names.insert(name) {
            return Err(ConfigError::DuplicateProfile {
                name: name.to_string(),
            });
        }
        if let Some(items) = profile.items_per_request {
            if ItemsPerRequest::new(items.get()).is_err() {
                return Err(ConfigError::invalid_value(
                    format!("profiles.{}.items_per_request", name),
                    format!("{} is out of range", items.get()),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_defaults_only() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.sync.items_per_request.get(), ItemsPerRequest::DEFAULT);
        assert!(config.sync.include_issue_details);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_file_layer_keeps_unset_defaults() {
        let file = yaml(
            r#"
sync:
  items_per_request: 50
  sync_order: [Parent, Child]
manager:
  wait_timeout_ms: 2000
profiles:
  - name: All
    track_duration: true
  - name: Accounts
    exclude: [Audit]
"#,
        );

        let config = ConfigBuilder::new().with_file(file.path()).build().unwrap();

        assert_eq!(config.sync.items_per_request.get(), 50);
        assert_eq!(config.sync.sync_order, vec!["Parent", "Child"]);
        assert_eq!(config.manager.wait_timeout_ms, Some(2000));
        assert_eq!(config.manager.poll_interval_ms, 50);
        assert!(config.profile("All").unwrap().track_duration);
        assert_eq!(config.profile("Accounts").unwrap().exclude, vec!["Audit"]);
    }

    #[test]
    fn test_optional_file_may_be_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        assert!(ConfigBuilder::new().with_file(&missing).build().is_ok());
        assert!(matches!(
            ConfigBuilder::new().with_required_file(&missing).build(),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_override_wins_over_file() {
        let file = yaml("manager:\n  force: false\n  poll_interval_ms: 20\n");

        let config = ConfigBuilder::new()
            .with_file(file.path())
            .with_override("manager.force", "true")
            .build()
            .unwrap();

        assert!(config.manager.force);
        assert_eq!(config.manager.poll_interval_ms, 20);
    }

    #[test]
    fn test_validation_names_key() {
        let file = yaml("sync:\n  items_per_request: 0\n");

        let error = ConfigBuilder::new()
            .with_file(file.path())
            .build()
            .unwrap_err();

        assert_eq!(error.key(), Some("sync.items_per_request"));
    }

    #[test]
    fn test_rejects_duplicate_order() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sync]\nsync_order = [\"Parent\", \"Parent\"]").unwrap();

        let error = ConfigBuilder::new()
            .with_file(file.path())
            .build()
            .unwrap_err();

        assert_eq!(error.key(), Some("sync.sync_order"));
    }

    #[test]
    fn test_rejects_duplicate_profile() {
        let mut config = Config::default();
        config.profiles.push(crate::ProfileConfig::new("All"));
        config.profiles.push(crate::ProfileConfig::new("All"));

        assert!(matches!(
            validate(&config),
            Err(ConfigError::DuplicateProfile { name }) if name == "All"
        ));
    }
}
