//! Helpers for working with openssl's X.509 types.
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, BigNumRef, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Builder, X509NameBuilder, X509NameRef, X509Ref};
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::commons::CertDepotResult;
use crate::commons::error::Error;
use crate::constants::CA_KEY_BITS;


//------------ Key Identifiers -----------------------------------------------

/// Derives the subject key identifier for a public key.
///
/// This is the SHA-1 hash of the subject public key bits, i.e., method (1)
/// of RFC 5280 section 4.2.1.2: the content of the BIT STRING inside the
/// SubjectPublicKeyInfo, whatever the key type. The same key always gives
/// the same identifier.
pub fn subject_key_id(key: &PKeyRef<Public>) -> CertDepotResult<Vec<u8>> {
    let der = key.public_key_to_der().map_err(|e| {
        Error::request(format!("cannot encode public key: {e}"))
    })?;
    let (_, info) = SubjectPublicKeyInfo::from_der(&der).map_err(|e| {
        Error::request(format!("cannot parse public key: {e}"))
    })?;
    let digest = hash(MessageDigest::sha1(), &info.subject_public_key.data)
        .map_err(Error::signing)?;
    Ok(digest.to_vec())
}


//------------ Names ---------------------------------------------------------

/// Returns the first common name of a certificate subject, if non-empty.
pub fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .filter(|cn| !cn.is_empty())
}

/// Returns the name under which a certificate is distributed.
///
/// This is the subject's common name or, for certificates without one, the
/// hex encoded signature.
pub fn display_name(cert: &X509Ref) -> String {
    match common_name(cert.subject_name()) {
        Some(cn) => cn,
        None => hex::encode(cert.signature().as_slice()),
    }
}

/// Renders a distinguished name as comma separated `KEY=value` pairs.
pub fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry.data().to_string().unwrap_or_default();
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join(",")
}


//------------ Serial Numbers ------------------------------------------------

/// Returns a certificate serial number as lowercase hex.
pub fn serial_hex(cert: &X509Ref) -> Result<String, ErrorStack> {
    let serial = cert.serial_number().to_bn()?;
    Ok(bn_to_hex(&serial))
}

/// Returns a big number as lowercase hex.
///
/// Zero results in an empty string.
pub fn bn_to_hex(bn: &BigNumRef) -> String {
    hex::encode(bn.to_vec())
}

fn random_serial_asn1() -> Result<Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, true)?;
    serial.to_asn1_integer()
}


//------------ Time ----------------------------------------------------------

/// Converts an ASN.1 time into a chrono time.
///
/// Fails for times chrono cannot represent.
pub fn to_utc(time: &Asn1TimeRef) -> CertDepotResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).map_err(Error::signing)?;
    let diff = epoch.diff(time).map_err(Error::signing)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        Error::signing(format!("time {time} is out of range"))
    })
}


//------------ Self-Signed CA ------------------------------------------------

/// Creates a new RSA key and a self-signed CA certificate for it.
pub fn create_ca(
    common_name: &str,
    validity_days: u32,
) -> Result<(X509, PKey<Private>), ErrorStack> {
    let rsa = Rsa::generate(CA_KEY_BITS)?;
    let key = PKey::from_rsa(rsa)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = random_serial_asn1()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(validity_days)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(&key)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new().critical().key_cert_sign().crl_sign().build()?
    )?;
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((builder.build(), key))
}


//------------ Tests ---------------------------------------------------------
