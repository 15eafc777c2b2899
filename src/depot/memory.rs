//! A depot that keeps everything in memory.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::x509::{X509, X509Ref};

use crate::commons::CertDepotResult;
use crate::commons::error::Error;
use super::{serial, CaMaterial, Depot};


//------------ MemoryDepot ---------------------------------------------------

/// A depot for tests and embedders that need no persistence.
///
/// It plays the distribution authority itself: it remembers the latest
/// certificate issued for each name and declines a new one while the current
/// one has more than the allowed renewal days of validity left.
#[derive(Debug)]
pub struct MemoryDepot {
    cert_pem: Option<Vec<u8>>,
    key_pem: Option<Vec<u8>>,
    next_serial: Mutex<Option<BigNum>>,
    issued: Mutex<HashMap<String, X509>>,
    distributions: AtomicUsize,
}

impl MemoryDepot {
    /// Creates a depot holding the given PEM encoded CA material.
    pub fn new(cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        MemoryDepot {
            cert_pem: Some(cert_pem),
            key_pem: Some(key_pem),
            ..Self::empty()
        }
    }

    /// Creates a depot without any CA material.
    pub fn empty() -> Self {
        MemoryDepot {
            cert_pem: None,
            key_pem: None,
            next_serial: Mutex::new(None),
            issued: Mutex::new(HashMap::new()),
            distributions: AtomicUsize::new(0),
        }
    }

    pub fn with_cert_only(cert_pem: Vec<u8>) -> Self {
        MemoryDepot { cert_pem: Some(cert_pem), ..Self::empty() }
    }

    /// Starts serial allocation at the given number.
    pub fn with_next_serial(self, serial: BigNum) -> Self {
        *self.next_serial.lock().expect("poisoned lock") = Some(serial);
        self
    }

    /// Returns the certificate currently held for `name`.
    pub fn issued(&self, name: &str) -> Option<X509> {
        self.issued.lock().expect("poisoned lock").get(name).cloned()
    }

    /// Returns how many certificates were offered for distribution.
    pub fn distributions(&self) -> usize {
        self.distributions.load(Ordering::SeqCst)
    }
}

impl Depot for MemoryDepot {
    fn ca(&self, pass: &[u8]) -> CertDepotResult<CaMaterial> {
        let cert_pem = self.cert_pem.as_deref().ok_or_else(|| {
            Error::cert_load("no CA certificate in memory depot")
        })?;
        let key_pem = self.key_pem.as_deref().ok_or_else(|| {
            Error::key_load("no CA key in memory depot")
        })?;
        CaMaterial::from_pem(cert_pem, key_pem, pass)
    }

    fn serial(&self) -> CertDepotResult<BigNum> {
        let mut next = self.next_serial.lock().expect("poisoned lock");
        let current = match next.take() {
            Some(serial) => serial,
            None => serial::random().map_err(|e| {
                Error::signing(format!("cannot create serial number: {e}"))
            })?,
        };
        *next = Some(serial::next(&current).map_err(|e| {
            Error::signing(format!("cannot increment serial number: {e}"))
        })?);
        Ok(current)
    }

    fn distribute(
        &self,
        name: &str,
        allow_renewal_days: u32,
        cert: &X509Ref,
    ) -> CertDepotResult<bool> {
        self.distributions.fetch_add(1, Ordering::SeqCst);

        let renewal_start = Asn1Time::days_from_now(allow_renewal_days)
            .map_err(|e| Error::signing(format!("cannot compute time: {e}")))?;

        let mut issued = self.issued.lock().expect("poisoned lock");
        if let Some(current) = issued.get(name) {
            let still_fresh = current.not_after().compare(&renewal_start)
                .map_err(|e| Error::signing(
                    format!("cannot compare times: {e}")
                ))?
                .is_gt();
            if still_fresh {
                warn!(
                    "Certificate for '{name}' is valid beyond the renewal \
                     window of {allow_renewal_days} days"
                );
                return Ok(false);
            }
            debug!("Superseding certificate for '{name}'");
        }
        issued.insert(name.to_string(), cert.to_owned());
        Ok(true)
    }
}


//------------ Tests ---------------------------------------------------------
