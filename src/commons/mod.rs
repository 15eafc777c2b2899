//! Common types used by the various components.
pub mod crypto;
pub mod error;
pub mod file;
pub mod httpclient;

//------------ Response Aliases ----------------------------------------------

pub type CertDepotResult<T> = std::result::Result<T, self::error::Error>;
