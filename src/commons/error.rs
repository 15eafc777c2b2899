//! Defines all issuance errors.
//!
//! None of the variants carry key material. Where an error wraps an
//! underlying cause, only the cause's description is kept.

use std::{error, fmt};

use openssl::error::ErrorStack;

use crate::commons::file::IoError;
use crate::commons::httpclient;


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    /// The CA private key is absent, malformed, or cannot be decrypted.
    KeyLoad(String),

    /// The CA certificate is absent or malformed.
    CertLoad(String),

    /// The serial number state cannot be read or written.
    SerialIo(IoError),

    /// The stored serial number is not hexadecimal.
    SerialFormat(String),

    /// A freshly signed certificate could not be parsed back.
    SignatureIntegrity(ErrorStack),

    /// The certificate could not be built or signed.
    Signing(String),

    /// The signing request cannot be used.
    Request(String),

    /// The distribution authority failed or could not be reached.
    Distribution(httpclient::Error),

    /// The distribution authority declined the certificate.
    DistributionRejected(String),
}

impl Error {
    pub fn key_load(msg: impl fmt::Display) -> Self {
        Error::KeyLoad(msg.to_string())
    }

    pub fn cert_load(msg: impl fmt::Display) -> Self {
        Error::CertLoad(msg.to_string())
    }

    pub fn serial_format(msg: impl fmt::Display) -> Self {
        Error::SerialFormat(msg.to_string())
    }

    pub fn signing(msg: impl fmt::Display) -> Self {
        Error::Signing(msg.to_string())
    }

    pub fn request(msg: impl fmt::Display) -> Self {
        Error::Request(msg.to_string())
    }

    pub fn distribution_rejected(name: impl fmt::Display) -> Self {
        Error::DistributionRejected(name.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::KeyLoad(msg) => {
                write!(f, "Cannot load CA key: {msg}")
            }
            Error::CertLoad(msg) => {
                write!(f, "Cannot load CA certificate: {msg}")
            }
            Error::SerialIo(e) => {
                write!(f, "Cannot access serial number store: {e}")
            }
            Error::SerialFormat(msg) => {
                write!(f, "Corrupt serial number store: {msg}")
            }
            Error::SignatureIntegrity(e) => {
                write!(f, "Signed certificate cannot be parsed: {e}")
            }
            Error::Signing(msg) => {
                write!(f, "Cannot sign certificate: {msg}")
            }
            Error::Request(msg) => {
                write!(f, "Invalid signing request: {msg}")
            }
            Error::Distribution(e) => {
                write!(f, "Distribution of certificate failed: {e}")
            }
            Error::DistributionRejected(name) => {
                write!(f,
                    "Distribution authority rejected certificate for '{name}'"
                )
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::SerialIo(e) => Some(e),
            Error::SignatureIntegrity(e) => Some(e),
            Error::Distribution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::SerialIo(e)
    }
}

impl From<httpclient::Error> for Error {
    fn from(e: httpclient::Error) -> Self {
        Error::Distribution(e)
    }
}


//------------ Tests ---------------------------------------------------------
