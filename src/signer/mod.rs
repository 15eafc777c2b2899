//! Issuing client certificates.
//!
//! The [`Signer`] holds no state of its own. Every call to
//! [`Signer::sign_csr`] takes a fresh serial number and the CA material from
//! its [`Depot`], signs a client authentication certificate, and only
//! returns it once the depot has distributed it.

use std::fmt;

use chrono::Utc;
use log::{debug, info, warn};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::pkey::Id;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName,
};
use openssl::x509::{X509, X509Builder, X509Extension};

use crate::commons::CertDepotResult;
use crate::commons::crypto;
use crate::commons::error::Error;
use crate::constants::{
    CLOCK_SKEW_SECS, DEFAULT_ALLOW_RENEWAL_DAYS, DEFAULT_VALIDITY_DAYS,
};
use crate::depot::{CaMaterial, Depot};

mod request;

pub use self::request::{SignatureAlgorithm, SigningRequest};


//------------ SignerConfig --------------------------------------------------

#[derive(Clone)]
pub struct SignerConfig {
    ca_pass: Vec<u8>,
    allow_renewal_days: u32,
    validity_days: u32,
}

impl SignerConfig {
    pub fn with_ca_pass(mut self, pass: impl Into<Vec<u8>>) -> Self {
        self.ca_pass = pass.into();
        self
    }

    pub fn with_allow_renewal_days(mut self, days: u32) -> Self {
        self.allow_renewal_days = days;
        self
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// The passphrase of the CA key, empty if the key is not encrypted.
    pub fn ca_pass(&self) -> &[u8] {
        &self.ca_pass
    }

    pub fn allow_renewal_days(&self) -> u32 {
        self.allow_renewal_days
    }

    pub fn validity_days(&self) -> u32 {
        self.validity_days
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            ca_pass: Vec::new(),
            allow_renewal_days: DEFAULT_ALLOW_RENEWAL_DAYS,
            validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("ca_pass", &"<redacted>")
            .field("allow_renewal_days", &self.allow_renewal_days)
            .field("validity_days", &self.validity_days)
            .finish()
    }
}


//------------ IssuanceState -------------------------------------------------

/// How far a single issuance got.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum IssuanceState {
    Start,
    SerialObtained,
    CaObtained,
    Signed,
    Parsed,
    Distributed,
    Done,
}

impl IssuanceState {
    fn advance(&mut self, next: IssuanceState) {
        debug!("Issuance: {self} -> {next}");
        *self = next;
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            IssuanceState::Start => "start",
            IssuanceState::SerialObtained => "serial obtained",
            IssuanceState::CaObtained => "CA obtained",
            IssuanceState::Signed => "signed",
            IssuanceState::Parsed => "parsed",
            IssuanceState::Distributed => "distributed",
            IssuanceState::Done => "done",
        };
        f.write_str(s)
    }
}


//------------ Signer --------------------------------------------------------

#[derive(Debug)]
pub struct Signer<D> {
    depot: D,
    config: SignerConfig,
}

impl<D: Depot> Signer<D> {
    pub fn new(depot: D, config: SignerConfig) -> Self {
        Signer { depot, config }
    }

    pub fn depot(&self) -> &D {
        &self.depot
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Issues a client certificate for the request.
    ///
    /// The certificate is returned only after the depot distributed it.
    /// Requests that cannot be issued are refused before a serial number is
    /// taken. Once taken, a serial number is used up even if a later step
    /// fails.
    pub fn sign_csr(&self, request: &SigningRequest) -> CertDepotResult<X509> {
        let mut state = IssuanceState::Start;
        self.issue(request, &mut state).inspect_err(|err| {
            debug!("Issuance failed after state '{state}': {err}");
        })
    }

    fn issue(
        &self,
        request: &SigningRequest,
        state: &mut IssuanceState,
    ) -> CertDepotResult<X509> {
        let mut template = CertTemplate::new(
            request, self.config.validity_days
        )?;

        let serial = self.depot.serial()?;
        template.set_serial(&serial).map_err(Error::signing)?;
        state.advance(IssuanceState::SerialObtained);

        let ca = self.depot.ca(&self.config.ca_pass)?;
        state.advance(IssuanceState::CaObtained);

        let der = template.sign(&ca).map_err(Error::signing)?;
        state.advance(IssuanceState::Signed);

        let cert = X509::from_der(&der).map_err(Error::SignatureIntegrity)?;
        state.advance(IssuanceState::Parsed);

        let name = crypto::display_name(&cert);
        let accepted = self.depot.distribute(
            &name, self.config.allow_renewal_days, &cert
        )?;
        if !accepted {
            warn!("Distribution authority declined certificate for '{name}'");
            return Err(Error::distribution_rejected(name));
        }
        state.advance(IssuanceState::Distributed);

        info!(
            "Issued certificate for '{}' with serial {}",
            name, crypto::bn_to_hex(&serial)
        );
        state.advance(IssuanceState::Done);
        Ok(cert)
    }
}


//------------ CertTemplate --------------------------------------------------

/// A client certificate waiting for its issuer.
struct CertTemplate {
    builder: X509Builder,
    algorithm: SignatureAlgorithm,
}

impl CertTemplate {
    fn new(
        request: &SigningRequest,
        validity_days: u32,
    ) -> CertDepotResult<Self> {
        let algorithm = request.signature_algorithm()
            .unwrap_or(SignatureAlgorithm::Sha256WithRsa);
        if algorithm.key_type() != Id::RSA {
            return Err(Error::signing(format!(
                "signature algorithm {algorithm} does not match RSA CA key"
            )));
        }

        let key_id = crypto::subject_key_id(request.public_key())?;

        let builder = Self::builder(request, &key_id, validity_days)
            .map_err(Error::signing)?;
        Ok(CertTemplate { builder, algorithm })
    }

    fn builder(
        request: &SigningRequest,
        key_id: &[u8],
        validity_days: u32,
    ) -> Result<X509Builder, ErrorStack> {
        let now = Utc::now().timestamp();
        let not_before = Asn1Time::from_unix(now - CLOCK_SKEW_SECS)?;
        let not_after = Asn1Time::from_unix(
            now + i64::from(validity_days) * 86_400
        )?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        builder.set_subject_name(request.subject())?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.set_pubkey(request.public_key())?;

        builder.append_extension(
            KeyUsage::new().critical().digital_signature().build()?
        )?;
        builder.append_extension(
            ExtendedKeyUsage::new().client_auth().build()?
        )?;
        builder.append_extension(subject_key_id_extension(key_id)?)?;

        if request.has_alt_names() {
            let mut san = SubjectAlternativeName::new();
            for dns in request.dns_names() {
                san.dns(dns);
            }
            for email in request.email_addresses() {
                san.email(email);
            }
            for ip in request.ip_addresses() {
                san.ip(&ip.to_string());
            }
            for uri in request.uris() {
                san.uri(uri);
            }
            let san = san.build(&builder.x509v3_context(None, None))?;
            builder.append_extension(san)?;
        }

        Ok(builder)
    }

    fn set_serial(&mut self, serial: &BigNum) -> Result<(), ErrorStack> {
        let serial = serial.to_asn1_integer()?;
        self.builder.set_serial_number(&serial)
    }

    /// Signs the certificate and returns its DER encoding.
    fn sign(self, ca: &CaMaterial) -> Result<Vec<u8>, ErrorStack> {
        let CertTemplate { mut builder, algorithm } = self;
        builder.set_issuer_name(ca.issuer().subject_name())?;
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&builder.x509v3_context(Some(ca.issuer()), None))?;
        builder.append_extension(aki)?;
        builder.sign(ca.key(), algorithm.digest())?;
        builder.build().to_der()
    }
}

/// Creates a subject key identifier extension with the given identifier.
fn subject_key_id_extension(
    key_id: &[u8],
) -> Result<X509Extension, ErrorStack> {
    let oid = Asn1Object::from_str("2.5.29.14")?;
    let mut value = Vec::with_capacity(key_id.len() + 2);
    value.push(0x04);
    value.push(key_id.len() as u8);
    value.extend_from_slice(key_id);
    let value = Asn1OctetString::new_from_bytes(&value)?;
    X509Extension::new_from_der(&oid, false, &value)
}


//------------ Tests ---------------------------------------------------------
