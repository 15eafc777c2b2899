//! Storage of the CA material and serial numbers.
//!
//! A [`Depot`] owns the CA certificate and key, hands out serial numbers,
//! and reports issued certificates to the distribution authority. The
//! [`Signer`][crate::signer::Signer] only ever sees this trait.

use std::fmt;

use openssl::bn::BigNum;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509Ref};

use crate::commons::CertDepotResult;
use crate::commons::error::Error;

mod disk;
mod memory;
pub mod serial;

pub use self::disk::FileDepot;
pub use self::memory::MemoryDepot;


//------------ Depot ---------------------------------------------------------

/// A repository for CA material, serial numbers and issued certificates.
pub trait Depot {
    /// Loads the CA certificate chain and decrypts the CA key.
    ///
    /// Fails with [`Error::KeyLoad`] if the key is absent, malformed, or
    /// `pass` is wrong, and with [`Error::CertLoad`] if the certificate is
    /// absent or malformed.
    fn ca(&self, pass: &[u8]) -> CertDepotResult<CaMaterial>;

    /// Returns a serial number this depot has never returned before.
    ///
    /// The serial is durably recorded as used before it is returned.
    fn serial(&self) -> CertDepotResult<BigNum>;

    /// Reports an issued certificate to the distribution authority.
    ///
    /// Returns whether the authority accepted the certificate. The authority
    /// may supersede an existing certificate for `name` that has less than
    /// `allow_renewal_days` of validity left.
    fn distribute(
        &self,
        name: &str,
        allow_renewal_days: u32,
        cert: &X509Ref,
    ) -> CertDepotResult<bool>;
}

impl<D: Depot + ?Sized> Depot for &D {
    fn ca(&self, pass: &[u8]) -> CertDepotResult<CaMaterial> {
        (**self).ca(pass)
    }

    fn serial(&self) -> CertDepotResult<BigNum> {
        (**self).serial()
    }

    fn distribute(
        &self,
        name: &str,
        allow_renewal_days: u32,
        cert: &X509Ref,
    ) -> CertDepotResult<bool> {
        (**self).distribute(name, allow_renewal_days, cert)
    }
}


//------------ CaMaterial ----------------------------------------------------

/// The CA certificate chain together with the CA private key.
pub struct CaMaterial {
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl CaMaterial {
    /// Creates the material. The chain must not be empty.
    pub fn new(chain: Vec<X509>, key: PKey<Private>) -> CertDepotResult<Self> {
        if chain.is_empty() {
            return Err(Error::cert_load("empty certificate chain"));
        }
        Ok(CaMaterial { chain, key })
    }

    /// Parses PEM encoded CA material, decrypting the key with `pass`.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        pass: &[u8],
    ) -> CertDepotResult<Self> {
        let chain = parse_cert_chain(cert_pem)?;
        let key = parse_rsa_key(key_pem, pass)?;
        Self::new(chain, key)
    }

    /// Returns the certificate that issues new certificates.
    pub fn issuer(&self) -> &X509Ref {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }
}

impl fmt::Debug for CaMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CaMaterial")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}


//------------ PEM Parsing ---------------------------------------------------

const CERTIFICATE_PEM_TAG: &str = "CERTIFICATE";
const RSA_PRIVATE_KEY_PEM_TAG: &str = "RSA PRIVATE KEY";

/// Parses a certificate chain from PEM `CERTIFICATE` blocks.
///
/// Blocks of any other type are an error.
pub fn parse_cert_chain(data: &[u8]) -> CertDepotResult<Vec<X509>> {
    let blocks = pem::parse_many(data)
        .map_err(|e| Error::cert_load(format!("PEM decode failed: {e}")))?;
    if blocks.is_empty() {
        return Err(Error::cert_load("PEM decode failed: no PEM block found"));
    }

    blocks.iter().map(|block| {
        if block.tag() != CERTIFICATE_PEM_TAG {
            return Err(Error::cert_load(format!(
                "unexpected PEM block type '{}'", block.tag()
            )));
        }
        X509::from_der(block.contents()).map_err(|e| {
            Error::cert_load(format!("cannot parse certificate: {e}"))
        })
    }).collect()
}

/// Parses a PEM `RSA PRIVATE KEY` block, decrypting it if needed.
///
/// The passphrase is ignored for unencrypted keys. Error messages never
/// contain any part of the key or passphrase.
pub fn parse_rsa_key(
    data: &[u8],
    pass: &[u8],
) -> CertDepotResult<PKey<Private>> {
    let block = pem::parse(data)
        .map_err(|e| Error::key_load(format!("PEM decode failed: {e}")))?;
    if block.tag() != RSA_PRIVATE_KEY_PEM_TAG {
        return Err(Error::key_load(format!(
            "unexpected PEM block type '{}'", block.tag()
        )));
    }

    let rsa = Rsa::private_key_from_pem_passphrase(data, pass).map_err(|_| {
        Error::key_load("cannot decrypt or decode key, wrong passphrase?")
    })?;
    PKey::from_rsa(rsa).map_err(Error::key_load)
}


//------------ Tests ---------------------------------------------------------
