//! Layered configuration for quire.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults ([`Config::defaults`]).
//! 2. `config.{toml,yaml,json}` in the platform config directory, or a
//!    single explicitly named file.
//! 3. Environment variables prefixed `QUIRE_`, nested keys split on `__`
//!    (`QUIRE_HTTP__READ_TIMEOUT_SECS=30`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::{Figment, Provider};
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "QUIRE_";
const APPLICATION: &str = "quire";
const CONFIG_FORMATS: [&str; 3] = ["toml", "yaml", "json"];
const DEFAULT_EXTENSION: &str = "img";
const MAX_DEFAULT_EXTENSION_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root of the disk tier. Created on first write.
    pub directory: PathBuf,
    /// Extension for entries whose location has none worth keeping.
    pub default_extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
    /// Responses larger than this are treated as failures.
    pub max_body_bytes: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            read_timeout_secs: 7,
            user_agent: concat!("quire/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Config {
    /// Load from every source, using the platform directories for defaults.
    ///
    /// With `explicit`, only that file is read; it must exist. Without it,
    /// any of `config.toml`, `config.yaml` or `config.json` present in the
    /// platform config directory is read, in that order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", APPLICATION);
        if dirs.is_none() {
            tracing::debug!("No platform directories; cache.directory must be set explicitly");
        }
        Self::load_with(dirs.as_ref(), explicit, Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// [`load()`](Self::load) with the platform directories and the
    /// highest-precedence layer supplied by the caller.
    ///
    /// Without platform directories there is no default cache directory and
    /// no default config file; the explicit file or `overrides` must then
    /// name the cache directory.
    pub fn load_with(dirs: Option<&ProjectDirs>, explicit: Option<&Path>, overrides: impl Provider) -> Result<Self> {
        let files: Vec<PathBuf> = match (explicit, dirs) {
            (Some(path), _) => vec![path.to_path_buf()],
            (None, Some(dirs)) => CONFIG_FORMATS
                .iter()
                .map(|format| dirs.config_dir().join(format!("config.{format}")))
                .filter(|path| path.is_file())
                .collect(),
            (None, None) => Vec::new(),
        };
        let figment = Self::layered(Self::defaults(dirs.map(ProjectDirs::cache_dir)), &files)?.merge(overrides);
        Self::from_figment(&figment)
    }

    /// Built-in defaults, with the disk tier under `cache_root` when there
    /// is one.
    pub fn defaults(cache_root: Option<&Path>) -> Figment {
        let figment = Figment::new()
            .merge(Serialized::default("cache.default_extension", DEFAULT_EXTENSION))
            .merge(Serialized::default("http", HttpConfig::default()));
        match cache_root {
            Some(root) => figment.merge(Serialized::default("cache.directory", root.join("covers"))),
            None => figment,
        }
    }

    /// Defaults overlaid with each file in turn. The format is chosen by
    /// file extension.
    pub fn layered(defaults: Figment, files: &[PathBuf]) -> Result<Figment> {
        let mut figment = defaults;
        for path in files {
            if !path.is_file() {
                exn::bail!(ErrorKind::Load(format!("{} is not a readable file", path.display())));
            }
            tracing::debug!(path = %path.display(), "Loading configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::Invalid(format!(
                    "{}: expected a .toml, .yaml or .json file",
                    path.display()
                ))),
            };
        }
        Ok(figment)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        if figment.find_value("cache.directory").is_err() {
            exn::bail!(ErrorKind::NoCacheDirectory);
        }
        let config: Config = figment.extract().map_err(|err| ErrorKind::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cache.directory.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "cache.directory must be an absolute path, got {}",
                self.cache.directory.display()
            )));
        }
        let extension = &self.cache.default_extension;
        if extension.is_empty()
            || extension.len() > MAX_DEFAULT_EXTENSION_LEN
            || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            exn::bail!(ErrorKind::Invalid(format!(
                "cache.default_extension must be 1-{MAX_DEFAULT_EXTENSION_LEN} ASCII letters or digits, got {extension:?}"
            )));
        }
        if self.http.connect_timeout_secs == 0 || self.http.read_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("http timeouts must be at least one second".to_string()));
        }
        if self.http.max_body_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("http.max_body_bytes must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    fn defaults(root: &Path) -> Figment {
        Config::defaults(Some(root))
    }

    #[test]
    fn test_defaults_are_valid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::from_figment(&Config::layered(defaults(temp_dir.path()), &[]).unwrap()).unwrap();
        assert_eq!(config.cache.directory, temp_dir.path().join("covers"));
        assert_eq!(config.cache.default_extension, "img");
        assert_eq!(config.http.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.read_timeout(), Duration::from_secs(7));
        assert!(config.http.user_agent.starts_with("quire/"));
    }

    #[rstest]
    #[case("config.toml", "[http]\nread_timeout_secs = 30\n")]
    #[case("config.yaml", "http:\n  read_timeout_secs: 30\n")]
    #[case("config.yml", "http:\n  read_timeout_secs: 30\n")]
    #[case("config.json", r#"{"http": {"read_timeout_secs": 30}}"#)]
    fn test_file_overrides_single_key(#[case] name: &str, #[case] contents: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(name);
        fs::write(&path, contents).unwrap();

        let figment = Config::layered(defaults(temp_dir.path()), &[path]).unwrap();
        let config = Config::from_figment(&figment).unwrap();
        assert_eq!(config.http.read_timeout_secs, 30);
        // Untouched keys keep their defaults.
        assert_eq!(config.http.connect_timeout_secs, 5);
        assert_eq!(config.cache.default_extension, "img");
    }

    #[test]
    fn test_later_layers_win() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[cache]\ndefault_extension = \"bin\"\n[http]\nread_timeout_secs = 30\n").unwrap();

        let figment = Config::layered(defaults(temp_dir.path()), &[path])
            .unwrap()
            .merge(Serialized::default("http.read_timeout_secs", 60));
        let config = Config::from_figment(&figment).unwrap();
        assert_eq!(config.http.read_timeout_secs, 60);
        assert_eq!(config.cache.default_extension, "bin");
    }

    #[test]
    fn test_missing_explicit_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Config::layered(defaults(temp_dir.path()), &[temp_dir.path().join("nope.toml")]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load(_)));
    }

    #[test]
    fn test_unknown_format() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.ini");
        fs::write(&path, "[http]\n").unwrap();
        let err = Config::layered(defaults(temp_dir.path()), &[path]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_wrong_type_is_load_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[http]\nread_timeout_secs = \"soon\"\n").unwrap();
        let figment = Config::layered(defaults(temp_dir.path()), &[path]).unwrap();
        let err = Config::from_figment(&figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load(_)));
    }

    #[rstest]
    #[case::relative_directory(|c: &mut Config| c.cache.directory = PathBuf::from("relative/covers"))]
    #[case::empty_extension(|c: &mut Config| c.cache.default_extension = String::new())]
    #[case::long_extension(|c: &mut Config| c.cache.default_extension = "verylongext".to_string())]
    #[case::dotted_extension(|c: &mut Config| c.cache.default_extension = ".png".to_string())]
    #[case::zero_timeout(|c: &mut Config| c.http.connect_timeout_secs = 0)]
    #[case::zero_body_limit(|c: &mut Config| c.http.max_body_bytes = 0)]
    fn test_invalid_values(#[case] tweak: fn(&mut Config)) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_figment(&defaults(temp_dir.path())).unwrap();
        tweak(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_invalid_layer_rejected_on_extract() {
        let temp_dir = tempfile::tempdir().unwrap();
        let figment = Config::layered(defaults(temp_dir.path()), &[])
            .unwrap()
            .merge(Serialized::default("cache.directory", "relative/covers"));
        let err = Config::from_figment(&figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_without_platform_dirs_cache_directory_is_required() {
        let err = Config::load_with(None, None, Serialized::default("http.read_timeout_secs", 30)).unwrap_err();
        assert_eq!(*err, ErrorKind::NoCacheDirectory);
    }

    #[test]
    fn test_without_platform_dirs_overrides_supply_cache_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let directory = temp_dir.path().join("elsewhere");
        let config = Config::load_with(None, None, Serialized::default("cache.directory", &directory)).unwrap();
        assert_eq!(config.cache.directory, directory);
        assert_eq!(config.cache.default_extension, "img");
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_without_platform_dirs_explicit_file_is_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("quire.toml");
        let directory = temp_dir.path().join("covers");
        fs::write(&path, format!("[cache]\ndirectory = {:?}\n", directory.display().to_string())).unwrap();

        let config = Config::load_with(None, Some(&path), Serialized::default("http.read_timeout_secs", 30)).unwrap();
        assert_eq!(config.cache.directory, directory);
        assert_eq!(config.http.read_timeout_secs, 30);
    }

    #[test]
    fn test_env_supplies_cache_directory_without_platform_dirs() {
        figment::Jail::expect_with(|jail| {
            let directory = jail.directory().join("from-env");
            jail.set_env("QUIRE_CACHE__DIRECTORY", directory.display());
            jail.set_env("QUIRE_HTTP__READ_TIMEOUT_SECS", 30);
            let config = Config::load_with(None, None, Env::prefixed(ENV_PREFIX).split("__")).unwrap();
            assert_eq!(config.cache.directory, directory);
            assert_eq!(config.http.read_timeout_secs, 30);
            Ok(())
        });
    }
}
