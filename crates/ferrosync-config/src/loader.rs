//! Locating, loading and writing configuration files

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult};
use config::FileFormat;
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, as in `FERROSYNC__MANAGER__FORCE=true`
pub const ENV_PREFIX: &str = "FERROSYNC";

const FILE_STEM: &str = "ferrosync";

/// On-disk configuration format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`, also used for unknown extensions
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Format for `path`
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::Toml,
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    /// Format name used in messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }

    /// Render `config` as text in this format
    pub fn render(self, config: &Config) -> ConfigResult<String> {
        let rendered = match self {
            Self::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
            Self::Toml => toml::to_string_pretty(config).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        };
        rendered.map_err(|message| ConfigError::render(self.name(), message))
    }
}

impl From<ConfigFormat> for FileFormat {
    fn from(format: ConfigFormat) -> Self {
        match format {
            ConfigFormat::Yaml => Self::Yaml,
            ConfigFormat::Toml => Self::Toml,
            ConfigFormat::Json => Self::Json,
        }
    }
}

/// Entry points used by the command line and embedding applications
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, the first file found in [`Self::search_paths`], then the environment
    pub fn load_default() -> ConfigResult<Config> {
        let mut builder = ConfigBuilder::new();
        if let Some(path) = Self::discover() {
            tracing::debug!("Using configuration file {}", path.display());
            builder = builder.with_file(path);
        }
        builder.with_env_prefix(ENV_PREFIX).build()
    }

    /// Defaults, then `path` which must exist, then the environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        ConfigBuilder::new()
            .with_required_file(path)
            .with_env_prefix(ENV_PREFIX)
            .build()
    }

    /// Check `path` without applying environment overrides
    pub fn validate_file<P: AsRef<Path>>(path: P) -> ConfigResult<()> {
        ConfigBuilder::new().with_required_file(path).build().map(drop)
    }

    /// Write `config` in the format implied by the extension of `path`
    pub fn save_to_file<P: AsRef<Path>>(config: &Config, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = ConfigFormat::from_path(path).render(config)?;
        std::fs::write(path, content).map_err(|e| ConfigError::write(path, e))
    }

    /// Write the built-in defaults to `path`
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> ConfigResult<()> {
        Self::save_to_file(&Config::default(), path)
    }

    /// First existing file among [`Self::search_paths`]
    pub fn discover() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.is_file())
    }

    /// Candidate files in order of preference
    ///
    /// The working directory comes first, then the user configuration
    /// directory, then `/etc/ferrosync` on Unix.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut directories = vec![PathBuf::from(".")];
        directories.extend(user_config_dir().map(|dir| dir.join(FILE_STEM)));
        if cfg!(unix) {
            directories.push(PathBuf::from("/etc").join(FILE_STEM));
        }

        let mut paths = Vec::new();
        for directory in directories {
            for extension in ["yaml", "yml", "toml", "json"] {
                paths.push(directory.join(format!("{}.{}", FILE_STEM, extension)));
            }
        }
        paths
    }
}

fn user_config_dir() -> Option<PathBuf> {
    let var = |name: &str| std::env::var_os(name).map(PathBuf::from);
    if cfg!(windows) {
        var("APPDATA")
    } else if cfg!(target_os = "macos") {
        var("HOME").map(|home| home.join("Library").join("Application Support"))
    } else {
        var("XDG_CONFIG_HOME").or_else(|| var("HOME").map(|home| home.join(".config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileConfig;
    use tempfile::TempDir;

    fn sample() -> Config {
        let mut config = Config::default();
        config.sync.sync_order = vec!["Parent".to_string(), "Child".to_string()];
        config.manager.wait_timeout_ms = Some(500);
        let mut accounts = ProfileConfig::new("Accounts");
        accounts.exclude.push("Audit".to_string());
        config.profiles.push(accounts);
        config
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.conf")), ConfigFormat::Yaml);
    }

    #[test]
    fn test_save_and_load_each_format() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["saved.yaml", "saved.toml", "saved.json"] {
            let path = temp_dir.path().join(name);
            ConfigLoader::save_to_file(&sample(), &path).unwrap();

            let loaded = ConfigLoader::load_from_file(&path).unwrap();
            assert_eq!(loaded.sync.sync_order, vec!["Parent", "Child"], "{}", name);
            assert_eq!(loaded.manager.wait_timeout_ms, Some(500), "{}", name);
            assert_eq!(loaded.manager.poll_interval_ms, 50, "{}", name);
            assert_eq!(loaded.profile("Accounts").unwrap().exclude, vec!["Audit"]);
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = ConfigLoader::load_from_file(temp_dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_generated_defaults_validate() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("default.yaml");

        ConfigLoader::generate_default_config(&config_path).unwrap();
        ConfigLoader::validate_file(&config_path).unwrap();

        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert!(config.sync.include_issue_details);
    }

    #[test]
    fn test_search_paths_start_in_working_directory() {
        let paths = ConfigLoader::search_paths();
        assert_eq!(paths[0], PathBuf::from(".").join("ferrosync.yaml"));
        assert!(paths.iter().all(|path| path.file_stem() == Some(std::ffi::OsStr::new("ferrosync"))));
    }
}
