//! The _certdepot_ library crate.
//!
//! Issues client-authentication certificates from a locally held CA. The
//! [`signer::Signer`] builds and signs certificates, the [`depot::Depot`]
//! owns the CA material and the serial number state, and reports every
//! issued certificate to an external distribution authority.

pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod depot;
pub mod distribution;
pub mod signer;
