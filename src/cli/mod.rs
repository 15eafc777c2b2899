//! The command line interface of the certdepot binary.

use std::path::PathBuf;
use std::{error, fmt};

use clap::Parser;
use log::info;
use openssl::symm::Cipher;

use crate::commons::crypto;
use crate::commons::error::Error;
use crate::commons::file::{self, IoError};
use crate::config::{Config, ConfigError};
use crate::constants::CERTDEPOT_DEFAULT_CONFIG_FILE;
use crate::depot::FileDepot;
use crate::distribution::DistributionClient;
use crate::signer::{Signer, SigningRequest};


//------------ Options -------------------------------------------------------

/// The command line options for certdepot.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Issues client certificates from a local CA.",
)]
pub struct Options {
    /// Path to the configuration file.
    #[arg(
        short, long,
        value_name = "path",
        default_value = CERTDEPOT_DEFAULT_CONFIG_FILE,
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won't result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn run(self) -> Result<(), CliError> {
        let config = Config::create(&self.config)?;
        self.command.run(&config)
    }
}


//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Issue a client certificate for a PKCS#10 request
    Sign(Sign),

    /// Create a self-signed CA in the data directory
    InitCa(InitCa),
}

impl Command {
    pub fn run(self, config: &Config) -> Result<(), CliError> {
        match self {
            Self::Sign(cmd) => cmd.run(config),
            Self::InitCa(cmd) => cmd.run(config),
        }
    }
}


//------------ Sign ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Sign {
    /// Path to the PEM encoded request
    #[arg(long, value_name = "path")]
    csr: PathBuf,

    /// Write the certificate here instead of stdout
    #[arg(long, value_name = "path")]
    out: Option<PathBuf>,
}

impl Sign {
    fn run(self, config: &Config) -> Result<(), CliError> {
        let csr = file::read(&self.csr)?;
        let request = SigningRequest::from_csr_pem(&csr)?;

        let distribution = DistributionClient::build(
            config.distribution_config()?
        ).map_err(Error::from)?;
        let depot = FileDepot::new(&config.data_dir, distribution);
        let signer = Signer::new(depot, config.signer_config());

        let cert = signer.sign_csr(&request)?;
        let pem = cert.to_pem().map_err(Error::signing)?;

        match self.out {
            Some(path) => file::save_atomic(&pem, &path, 0o644)?,
            None => print!("{}", String::from_utf8_lossy(&pem)),
        }
        Ok(())
    }
}


//------------ InitCa --------------------------------------------------------

#[derive(clap::Parser)]
pub struct InitCa {
    /// Common name of the CA
    #[arg(long, value_name = "name")]
    cn: String,

    /// Validity of the CA certificate in days
    #[arg(long, value_name = "days", default_value_t = 3650)]
    days: u32,
}

impl InitCa {
    fn run(self, config: &Config) -> Result<(), CliError> {
        let (cert, key) = crypto::create_ca(&self.cn, self.days)
            .map_err(Error::signing)?;
        let rsa = key.rsa().map_err(Error::signing)?;
        let key_pem = match config.ca_pass() {
            Some(pass) => rsa.private_key_to_pem_passphrase(
                Cipher::aes_256_cbc(), pass
            ),
            None => rsa.private_key_to_pem(),
        }.map_err(Error::signing)?;
        let cert_pem = cert.to_pem().map_err(Error::signing)?;

        FileDepot::install_ca(&config.data_dir, &cert_pem, &key_pem)?;
        info!(
            "Created CA '{}' in '{}'", self.cn, config.data_dir.display()
        );
        Ok(())
    }
}


//------------ CliError ------------------------------------------------------

#[derive(Debug)]
pub enum CliError {
    Config(ConfigError),
    Io(IoError),
    Issuance(Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CliError::Config(e) => e.fmt(f),
            CliError::Io(e) => e.fmt(f),
            CliError::Issuance(e) => e.fmt(f),
        }
    }
}

impl error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<IoError> for CliError {
    fn from(e: IoError) -> Self {
        CliError::Io(e)
    }
}

impl From<Error> for CliError {
    fn from(e: Error) -> Self {
        CliError::Issuance(e)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Options::command().debug_assert();
    }

    #[test]
    fn parse_sign() {
        let options = Options::try_parse_from([
            "certdepot", "-c", "/tmp/certdepot.conf",
            "sign", "--csr", "client.csr", "--out", "client.pem",
        ]).unwrap();
        assert_eq!(options.config, PathBuf::from("/tmp/certdepot.conf"));
        match options.command {
            Command::Sign(sign) => {
                assert_eq!(sign.csr, PathBuf::from("client.csr"));
                assert_eq!(sign.out, Some(PathBuf::from("client.pem")));
            }
            _ => panic!("expected sign command"),
        }
    }

    #[test]
    fn parse_init_ca_defaults() {
        let options = Options::try_parse_from([
            "certdepot", "init-ca", "--cn", "Test CA",
        ]).unwrap();
        assert_eq!(
            options.config, PathBuf::from(CERTDEPOT_DEFAULT_CONFIG_FILE)
        );
        match options.command {
            Command::InitCa(init) => {
                assert_eq!(init.cn, "Test CA");
                assert_eq!(init.days, 3650);
            }
            _ => panic!("expected init-ca command"),
        }
    }

    #[test]
    fn init_ca_then_sign_locally() {
        use crate::depot::Depot;
        use crate::test;

        test::test_under_tmp(|d| {
            let config = Config::parse(&format!(
                "data_dir = \"{}\"\nca_pass = \"pass\"", d.display()
            )).unwrap();
            InitCa { cn: "Test CA".into(), days: 10 }.run(&config).unwrap();

            let depot = FileDepot::new(&d, test::unreachable_distribution());
            let ca = depot.ca(b"pass").unwrap();
            assert_eq!(
                crypto::common_name(ca.issuer().subject_name()).as_deref(),
                Some("Test CA")
            );

            // Refuses to overwrite.
            assert!(
                InitCa { cn: "Other".into(), days: 10 }.run(&config).is_err()
            );
        })
    }
}
