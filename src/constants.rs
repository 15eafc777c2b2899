//! Various crate-wide constants.

use std::time::Duration;


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `certdepot` binary.
pub const CERTDEPOT_APP: &str = "certdepot";

/// The version of this crate, used in the HTTP user agent.
pub const CERTDEPOT_VERSION: &str = env!("CARGO_PKG_VERSION");


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const CERTDEPOT_DEFAULT_CONFIG_FILE: &str = "/etc/certdepot.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const CERTDEPOT_ENV_LOG_LEVEL: &str = "CERTDEPOT_LOG_LEVEL";

/// The environment variable with the passphrase of the CA key.
pub const CERTDEPOT_ENV_CA_PASS: &str = "CERTDEPOT_CA_PASS";

/// The environment variable with the distribution endpoint.
pub const CERTDEPOT_ENV_DISTRIBUTION_URI: &str = "URL_CERT";

/// The environment variable with the distribution bearer token.
pub const CERTDEPOT_ENV_DISTRIBUTION_TOKEN: &str = "JWT_TOKEN";


//------------ Depot Files --------------------------------------------------

/// The file holding the PEM encoded CA certificate chain.
pub const CA_CERT_FILE: &str = "ca.pem";

/// The file holding the PEM encoded CA private key.
pub const CA_KEY_FILE: &str = "ca.key";

/// The file holding the next serial number.
pub const SERIAL_FILE: &str = "serial";

/// The lock file guarding the serial number file.
pub const SERIAL_LOCK_FILE: &str = ".serial.lock";

/// The mode of the serial file: owner read only.
pub const SERIAL_FILE_MODE: u32 = 0o400;


//------------ Issuance -----------------------------------------------------

/// The default number of days before expiry a certificate may be renewed.
pub const DEFAULT_ALLOW_RENEWAL_DAYS: u32 = 14;

/// The default validity period of issued certificates, in days.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// How far `notBefore` is backdated to accommodate clock skew.
pub const CLOCK_SKEW_SECS: i64 = 600;

/// The number of random bits in the first serial number of a fresh depot.
pub const INITIAL_SERIAL_BITS: i32 = 130;

/// The key size used when bootstrapping a new CA.
pub const CA_KEY_BITS: u32 = 2048;


//------------ Distribution -------------------------------------------------

/// The default timeout for the distribution call.
pub const DISTRIBUTION_TIMEOUT_SECS: u64 = 30;

pub fn distribution_timeout() -> Duration {
    Duration::from_secs(DISTRIBUTION_TIMEOUT_SECS)
}
