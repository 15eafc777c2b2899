//! Configuration of the certdepot binary.
//!
//! The configuration is read from a TOML file. Settings missing from the
//! file fall back to [`ConfigDefaults`], some of which consult environment
//! variables. This is the only place in the crate that reads the
//! environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt, fs, io};

use log::{LevelFilter, error, info};
use serde::de;
use serde::{Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;
use url::Url;

use crate::constants::{
    CERTDEPOT_APP, CERTDEPOT_DEFAULT_CONFIG_FILE, CERTDEPOT_ENV_CA_PASS,
    CERTDEPOT_ENV_DISTRIBUTION_TOKEN, CERTDEPOT_ENV_DISTRIBUTION_URI,
    CERTDEPOT_ENV_LOG_LEVEL, DEFAULT_ALLOW_RENEWAL_DAYS,
    DEFAULT_VALIDITY_DAYS, DISTRIBUTION_TIMEOUT_SECS,
};
use crate::distribution::{DistributionConfig, Token};
use crate::signer::SignerConfig;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn data_dir() -> PathBuf {
        PathBuf::from("./data")
    }

    fn ca_pass() -> Option<CaPass> {
        env::var(CERTDEPOT_ENV_CA_PASS).ok().map(CaPass)
    }

    fn allow_renewal_days() -> u32 {
        DEFAULT_ALLOW_RENEWAL_DAYS
    }

    fn validity_days() -> u32 {
        DEFAULT_VALIDITY_DAYS
    }

    /// Parses the distribution endpoint taken from the environment.
    ///
    /// A value that is set but not a URI is an error, not a missing value.
    fn distribution_uri(
        value: Option<String>,
    ) -> Result<Option<Url>, ConfigError> {
        value.map(|uri| {
            Url::parse(&uri).map_err(|e| ConfigError::Other(format!(
                "Invalid {CERTDEPOT_ENV_DISTRIBUTION_URI} '{uri}': {e}"
            )))
        }).transpose()
    }

    fn distribution_token() -> Option<Token> {
        env::var(CERTDEPOT_ENV_DISTRIBUTION_TOKEN).ok().map(Token::from)
    }

    fn distribution_timeout_secs() -> u64 {
        DISTRIBUTION_TIMEOUT_SECS
    }

    fn log_level() -> LevelFilter {
        match env::var(CERTDEPOT_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        CERTDEPOT_ENV_LOG_LEVEL
                    );
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./certdepot.log")
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "ConfigDefaults::ca_pass")]
    ca_pass: Option<CaPass>,

    #[serde(default = "ConfigDefaults::allow_renewal_days")]
    pub allow_renewal_days: u32,

    #[serde(default = "ConfigDefaults::validity_days")]
    pub validity_days: u32,

    #[serde(default)]
    pub distribution_uri: Option<Url>,

    #[serde(default = "ConfigDefaults::distribution_token")]
    distribution_token: Option<Token>,

    #[serde(default = "ConfigDefaults::distribution_timeout_secs")]
    pub distribution_timeout_secs: u64,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,
}

/// # Accessors
impl Config {
    pub fn ca_pass(&self) -> Option<&[u8]> {
        self.ca_pass.as_ref().map(|pass| pass.0.as_bytes())
    }

    /// Returns the configuration for the signer.
    pub fn signer_config(&self) -> SignerConfig {
        let config = SignerConfig::default()
            .with_allow_renewal_days(self.allow_renewal_days)
            .with_validity_days(self.validity_days);
        match self.ca_pass() {
            Some(pass) => config.with_ca_pass(pass),
            None => config,
        }
    }

    /// Returns the configuration for the distribution client.
    ///
    /// Fails if the endpoint or the token is missing, or if the endpoint
    /// from the environment is malformed.
    pub fn distribution_config(
        &self,
    ) -> Result<DistributionConfig, ConfigError> {
        let uri = match self.distribution_uri.clone() {
            Some(uri) => Some(uri),
            None => ConfigDefaults::distribution_uri(
                env::var(CERTDEPOT_ENV_DISTRIBUTION_URI).ok()
            )?,
        };
        let uri = uri.ok_or_else(|| {
            ConfigError::Other(format!(
                "Missing distribution_uri, set it in the config file \
                 or via {CERTDEPOT_ENV_DISTRIBUTION_URI}"
            ))
        })?;
        let token = self.distribution_token.clone().ok_or_else(|| {
            ConfigError::Other(format!(
                "Missing distribution_token, set it in the config file \
                 or via {CERTDEPOT_ENV_DISTRIBUTION_TOKEN}"
            ))
        })?;
        Ok(DistributionConfig::new(uri, token).with_timeout(
            Duration::from_secs(self.distribution_timeout_secs)
        ))
    }
}

/// # Create
impl Config {
    /// Reads and verifies the configuration, then starts logging.
    pub fn create(config_file: &Path) -> Result<Self, ConfigError> {
        let config = match Self::read_config(config_file) {
            Err(e) => {
                if config_file == Path::new(CERTDEPOT_DEFAULT_CONFIG_FILE) {
                    Err(ConfigError::other(
                        "Cannot find config file. Please use --config to \
                         specify its location.",
                    ))
                } else {
                    Err(ConfigError::Other(format!(
                        "Error parsing config file: {}, error: {}",
                        config_file.display(), e
                    )))
                }
            }
            Ok(config) => {
                config.init_logging()?;
                info!(
                    "{} uses configuration file: {}",
                    CERTDEPOT_APP, config_file.display()
                );
                Ok(config)
            }
        }?;
        config.verify().map_err(|e| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                config_file.display(), e
            ))
        })?;
        Ok(config)
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(file)?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::TomlError)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.validity_days == 0 {
            return Err(ConfigError::other("validity_days must be > 0"));
        }
        if self.allow_renewal_days == 0 {
            return Err(ConfigError::other("allow_renewal_days must be > 0"));
        }
        if self.allow_renewal_days >= self.validity_days {
            return Err(ConfigError::other(
                "allow_renewal_days must be smaller than validity_days",
            ));
        }
        if self.distribution_timeout_secs == 0 {
            return Err(ConfigError::other(
                "distribution_timeout_secs must be > 0",
            ));
        }
        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => {
                let facility = Facility::from_str(&self.syslog_facility)
                    .map_err(|_| {
                        ConfigError::other("Invalid syslog_facility")
                    })?;
                self.syslog_logger(facility)
            }
            #[cfg(not(unix))]
            LogType::Syslog => Err(ConfigError::other(
                "Syslog is only supported on Unix systems",
            )),
        }
    }

    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(
                    format!("Failed to init stderr logging: {e}")
                )
            })
    }

    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(), err
                );
                error!("{error_string}");
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init file logging: {e}"))
            })
    }

    #[cfg(unix)]
    fn syslog_logger(&self, facility: Facility) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from(CERTDEPOT_APP));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger()
                    .chain(logger)
                    .apply()
                    .map_err(|e| {
                        ConfigError::Other(format!("Failed to init syslog: {e}"))
                    })
            }
            Err(err) => {
                Err(ConfigError::Other(
                    format!("Cannot connect to syslog: {err}")
                ))
            }
        }
    }

    fn fern_logger(&self) -> fern::Dispatch {
        // Suppress overly noisy logging.
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ CaPass --------------------------------------------------------

#[derive(Clone, Deserialize)]
#[serde(transparent)]
struct CaPass(String);

impl fmt::Debug for CaPass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CaPass(<redacted>)")
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{string}\""
            ))),
        }
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        data_dir = "/var/lib/certdepot"
        ca_pass = "secret"
        allow_renewal_days = 7
        validity_days = 30
        distribution_uri = "https://ra.example.net/certs"
        distribution_token = "token"
        distribution_timeout_secs = 5
        log_level = "debug"
        log_type = "file"
        log_file = "/var/log/certdepot.log"
    "#;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        config.verify().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/certdepot"));
        assert_eq!(config.ca_pass(), Some(&b"secret"[..]));
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_type, LogType::File);

        let signer = config.signer_config();
        assert_eq!(signer.ca_pass(), b"secret");
        assert_eq!(signer.allow_renewal_days(), 7);
        assert_eq!(signer.validity_days(), 30);

        let distribution = config.distribution_config().unwrap();
        assert_eq!(distribution.uri.as_str(), "https://ra.example.net/certs");
        assert_eq!(distribution.token.as_ref(), "token");
        assert_eq!(distribution.timeout, Duration::from_secs(5));
    }

    #[test]
    fn secrets_are_not_in_debug() {
        let config = Config::parse(FULL).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("\"token\""));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::parse(r#"log_level = "info""#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.allow_renewal_days, 14);
        assert_eq!(config.validity_days, 365);
        assert_eq!(config.distribution_timeout_secs, 30);
        assert_eq!(config.log_type, LogType::Stderr);
        config.verify().unwrap();
    }

    #[test]
    fn renewal_window_must_be_shorter_than_validity() {
        let config = Config::parse(
            "allow_renewal_days = 30\nvalidity_days = 30"
        ).unwrap();
        assert!(config.verify().is_err());

        let config = Config::parse("validity_days = 0").unwrap();
        assert!(config.verify().is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Config::parse(r#"log_level = "loud""#).is_err());
        assert!(Config::parse(r#"log_type = "journal""#).is_err());
        assert!(Config::parse(r#"distribution_uri = "not a uri""#).is_err());
    }

    #[test]
    fn malformed_env_uri_is_reported() {
        let err = ConfigDefaults::distribution_uri(
            Some("ra.example.net/certs".into())
        ).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid URL_CERT 'ra.example.net/certs'"), "{msg}");

        assert!(ConfigDefaults::distribution_uri(None).unwrap().is_none());
        let uri = ConfigDefaults::distribution_uri(
            Some("https://ra.example.net".into())
        ).unwrap().unwrap();
        assert_eq!(uri.host_str(), Some("ra.example.net"));
    }
}
