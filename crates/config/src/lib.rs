//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults.
//! 2. A configuration file: `carcheck.toml`, `carcheck.yaml`, `carcheck.yml`
//!    or `carcheck.json` in the platform configuration directory, or one
//!    explicit path.
//! 3. Environment variables prefixed `CARCHECK_`. Nested keys are separated
//!    by `__`, e.g. `CARCHECK_UPLOAD__MAX_ATTEMPTS=5`.

pub mod error;

use crate::error::{ErrorKind, Result};
use carcheck_remote::RemotePath;
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::UtcOffset;

pub const ENV_PREFIX: &str = "CARCHECK_";
pub const FILE_STEM: &str = "carcheck";
const FILE_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];
/// Largest accepted offset from UTC, in minutes (23:59).
pub const MAX_UTC_OFFSET_MINUTES: i16 = 23 * 60 + 59;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", FILE_STEM)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of the file-backed key-value store.
    pub data_dir: PathBuf,
    pub remote: RemoteConfig,
    pub upload: UploadConfig,
    pub log: LogConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: project_dirs().map_or_else(|| PathBuf::from(".carcheck"), |dirs| dirs.data_dir().to_path_buf()),
            remote: RemoteConfig::default(),
            upload: UploadConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_base: String,
    /// Per-request timeout. No timeout is imposed unless configured.
    pub request_timeout_secs: Option<u64>,
}
impl Default for RemoteConfig {
    fn default() -> Self {
        Self { api_base: carcheck_remote::backend::DEFAULT_API_BASE.to_string(), request_timeout_secs: None }
    }
}
impl RemoteConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub root_folder: String,
    /// Whole-item attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for each further retry.
    pub retry_delay_ms: u64,
    /// Offset from UTC used to format folder names.
    pub utc_offset_minutes: i16,
}
impl Default for UploadConfig {
    fn default() -> Self {
        Self { root_folder: "/Inspections".to_string(), max_attempts: 3, retry_delay_ms: 500, utc_offset_minutes: 0 }
    }
}
impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn utc_offset(&self) -> Result<UtcOffset> {
        UtcOffset::from_whole_seconds(i32::from(self.utc_offset_minutes) * 60).or_raise(|| ErrorKind::InvalidValue {
            key: "upload.utc_offset_minutes",
            reason: "must be within ±23:59",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,carcheck_upload=debug`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    Ok(match path.extension().and_then(OsStr::to_str) {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.display().to_string())),
    })
}

impl Config {
    /// The merged, unvalidated sources.
    ///
    /// With `file` set, only that file is read and it must exist. Otherwise
    /// every `carcheck.*` file present in the platform configuration
    /// directory is merged, in the order toml, yaml, yml, json.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.display().to_string()));
                }
                figment = merge_file(figment, path)?;
            },
            None => {
                if let Some(dirs) = project_dirs() {
                    for extension in FILE_EXTENSIONS {
                        let path = dirs.config_dir().join(format!("{FILE_STEM}.{extension}"));
                        figment = merge_file(figment, &path)?;
                    }
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().or_raise(|| ErrorKind::Extract)?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |key, reason| exn::Exn::from(ErrorKind::InvalidValue { key, reason });
        if !self.remote.api_base.starts_with("https://") && !self.remote.api_base.starts_with("http://") {
            return Err(invalid("remote.api_base", "must be an http(s) URL"));
        }
        if self.remote.request_timeout_secs == Some(0) {
            return Err(invalid("remote.request_timeout_secs", "must be positive"));
        }
        if !self.upload.root_folder.starts_with('/') || RemotePath::parse(&self.upload.root_folder).is_err() {
            return Err(invalid("upload.root_folder", "must be an absolute remote path"));
        }
        if self.upload.max_attempts == 0 {
            return Err(invalid("upload.max_attempts", "must be at least 1"));
        }
        if self.upload.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(invalid("upload.utc_offset_minutes", "must be within ±23:59"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn with_upload(f: impl FnOnce(&mut UploadConfig)) -> Config {
        let mut config = Config::default();
        f(&mut config.upload);
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.remote.api_base, "https://cloud-api.yandex.net/v1/disk");
        assert_eq!(config.remote.request_timeout(), None);
        assert_eq!(config.upload.root_folder, "/Inspections");
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.upload.utc_offset().unwrap(), UtcOffset::UTC);
        assert_eq!(config.log.filter, "info");
    }

    #[rstest]
    #[case::zero_attempts(with_upload(|u| u.max_attempts = 0), "upload.max_attempts")]
    #[case::relative_root(with_upload(|u| u.root_folder = "Inspections".to_string()), "upload.root_folder")]
    #[case::bare_root(with_upload(|u| u.root_folder = "/".to_string()), "upload.root_folder")]
    #[case::dot_segment(with_upload(|u| u.root_folder = "/a/../b".to_string()), "upload.root_folder")]
    #[case::offset_out_of_range(with_upload(|u| u.utc_offset_minutes = 24 * 60), "upload.utc_offset_minutes")]
    fn test_validation(#[case] config: Config, #[case] expected: &str) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidValue { key, .. } if *key == expected));
    }

    #[test]
    fn test_negative_offset() {
        let config = with_upload(|u| u.utc_offset_minutes = -(5 * 60 + 30));
        config.validate().unwrap();
        assert_eq!(config.upload.utc_offset().unwrap(), UtcOffset::from_hms(-5, -30, 0).unwrap());
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "carcheck.toml",
                r#"
                data_dir = "/var/lib/carcheck"

                [upload]
                root_folder = "/Cars"
                max_attempts = 2

                [log]
                json = true
                "#,
            )?;
            jail.set_env("CARCHECK_UPLOAD__MAX_ATTEMPTS", "5");
            jail.set_env("CARCHECK_REMOTE__REQUEST_TIMEOUT_SECS", "30");

            let config = Config::load(Some(Path::new("carcheck.toml"))).unwrap();
            assert_eq!(config.data_dir, PathBuf::from("/var/lib/carcheck"));
            assert_eq!(config.upload.root_folder, "/Cars");
            assert_eq!(config.upload.max_attempts, 5);
            assert_eq!(config.upload.retry_delay_ms, 500);
            assert_eq!(config.remote.request_timeout(), Some(Duration::from_secs(30)));
            assert!(config.log.json);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("carcheck.yaml", "upload:\n  utc_offset_minutes: 180\n")?;
            let config = Config::load(Some(Path::new("carcheck.yaml"))).unwrap();
            assert_eq!(config.upload.utc_offset_minutes, 180);
            Ok(())
        });
    }

    #[test]
    fn test_file_errors() {
        Jail::expect_with(|jail| {
            let err = Config::load(Some(Path::new("missing.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));

            jail.create_file("carcheck.ini", "max_attempts = 1")?;
            let err = Config::load(Some(Path::new("carcheck.ini"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));

            jail.create_file("bad.toml", "[upload]\nmax_attempts = \"many\"\n")?;
            let err = Config::load(Some(Path::new("bad.toml"))).unwrap_err();
            assert_eq!(*err, ErrorKind::Extract);

            jail.create_file("zero.toml", "[upload]\nmax_attempts = 0\n")?;
            let err = Config::load(Some(Path::new("zero.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidValue { key: "upload.max_attempts", .. }));
            Ok(())
        });
    }
}
