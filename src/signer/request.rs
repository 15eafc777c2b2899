//! The input to certificate issuance.

use std::fmt;
use std::net::IpAddr;

use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Public};
use openssl::x509::{X509Name, X509NameRef, X509Req};
use url::Url;
use x509_parser::prelude::{
    FromDer, GeneralName, ParsedExtension, X509CertificationRequest,
};

use crate::commons::CertDepotResult;
use crate::commons::crypto::name_to_string;
use crate::commons::error::Error;


//------------ SignatureAlgorithm --------------------------------------------

/// A signature algorithm a certificate can be requested with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureAlgorithm {
    Sha256WithRsa,
    Sha384WithRsa,
    Sha512WithRsa,
    EcdsaWithSha256,
    EcdsaWithSha384,
    EcdsaWithSha512,
}

impl SignatureAlgorithm {
    pub fn digest(self) -> MessageDigest {
        match self {
            SignatureAlgorithm::Sha256WithRsa
            | SignatureAlgorithm::EcdsaWithSha256 => MessageDigest::sha256(),
            SignatureAlgorithm::Sha384WithRsa
            | SignatureAlgorithm::EcdsaWithSha384 => MessageDigest::sha384(),
            SignatureAlgorithm::Sha512WithRsa
            | SignatureAlgorithm::EcdsaWithSha512 => MessageDigest::sha512(),
        }
    }

    /// Returns the type of key that signs with this algorithm.
    pub fn key_type(self) -> Id {
        match self {
            SignatureAlgorithm::Sha256WithRsa
            | SignatureAlgorithm::Sha384WithRsa
            | SignatureAlgorithm::Sha512WithRsa => Id::RSA,
            _ => Id::EC,
        }
    }

    /// Maps a dotted signature algorithm OID to an algorithm.
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            "1.2.840.113549.1.1.11" => Some(SignatureAlgorithm::Sha256WithRsa),
            "1.2.840.113549.1.1.12" => Some(SignatureAlgorithm::Sha384WithRsa),
            "1.2.840.113549.1.1.13" => Some(SignatureAlgorithm::Sha512WithRsa),
            "1.2.840.10045.4.3.2" => Some(SignatureAlgorithm::EcdsaWithSha256),
            "1.2.840.10045.4.3.3" => Some(SignatureAlgorithm::EcdsaWithSha384),
            "1.2.840.10045.4.3.4" => Some(SignatureAlgorithm::EcdsaWithSha512),
            _ => None,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SignatureAlgorithm::Sha256WithRsa => "SHA256-RSA",
            SignatureAlgorithm::Sha384WithRsa => "SHA384-RSA",
            SignatureAlgorithm::Sha512WithRsa => "SHA512-RSA",
            SignatureAlgorithm::EcdsaWithSha256 => "ECDSA-SHA256",
            SignatureAlgorithm::EcdsaWithSha384 => "ECDSA-SHA384",
            SignatureAlgorithm::EcdsaWithSha512 => "ECDSA-SHA512",
        };
        f.write_str(s)
    }
}


//------------ SigningRequest ------------------------------------------------

/// A request for a client certificate.
///
/// Holds the subject and public key of the certificate to be issued, the
/// subject alternative names to include, and optionally the signature
/// algorithm to sign with.
pub struct SigningRequest {
    subject: X509Name,
    public_key: PKey<Public>,
    dns_names: Vec<String>,
    email_addresses: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    uris: Vec<String>,
    signature_algorithm: Option<SignatureAlgorithm>,
}

impl SigningRequest {
    pub fn new(subject: X509Name, public_key: PKey<Public>) -> Self {
        SigningRequest {
            subject,
            public_key,
            dns_names: Vec::new(),
            email_addresses: Vec::new(),
            ip_addresses: Vec::new(),
            uris: Vec::new(),
            signature_algorithm: None,
        }
    }

    pub fn with_dns_names(mut self, names: Vec<String>) -> Self {
        self.dns_names = names;
        self
    }

    pub fn with_email_addresses(mut self, addresses: Vec<String>) -> Self {
        self.email_addresses = addresses;
        self
    }

    pub fn with_ip_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.ip_addresses = addresses;
        self
    }

    /// Sets the URIs. They are issued exactly as given.
    pub fn with_uris(mut self, uris: Vec<String>) -> Self {
        self.uris = uris;
        self
    }

    pub fn with_signature_algorithm(
        mut self, algorithm: SignatureAlgorithm,
    ) -> Self {
        self.signature_algorithm = Some(algorithm);
        self
    }

    pub fn subject(&self) -> &X509NameRef {
        &self.subject
    }

    pub fn public_key(&self) -> &PKey<Public> {
        &self.public_key
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn email_addresses(&self) -> &[String] {
        &self.email_addresses
    }

    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        self.signature_algorithm
    }

    pub fn has_alt_names(&self) -> bool {
        !(self.dns_names.is_empty()
            && self.email_addresses.is_empty()
            && self.ip_addresses.is_empty()
            && self.uris.is_empty())
    }

    /// Reads a PEM encoded PKCS#10 request.
    pub fn from_csr_pem(pem: &[u8]) -> CertDepotResult<Self> {
        let req = X509Req::from_pem(pem).map_err(|e| {
            Error::request(format!("cannot parse PEM request: {e}"))
        })?;
        let der = req.to_der().map_err(Error::request)?;
        Self::from_csr(req, &der)
    }

    /// Reads a DER encoded PKCS#10 request.
    pub fn from_csr_der(der: &[u8]) -> CertDepotResult<Self> {
        let req = X509Req::from_der(der).map_err(|e| {
            Error::request(format!("cannot parse request: {e}"))
        })?;
        Self::from_csr(req, der)
    }

    /// Converts a request after checking its self-signature.
    fn from_csr(req: X509Req, der: &[u8]) -> CertDepotResult<Self> {
        let public_key = req.public_key().map_err(|e| {
            Error::request(format!("cannot read public key: {e}"))
        })?;
        if !req.verify(&public_key).unwrap_or(false) {
            return Err(Error::request("request signature does not verify"));
        }

        let (_, parsed) = X509CertificationRequest::from_der(der)
            .map_err(|e| Error::request(format!("cannot parse request: {e}")))?;

        let algorithm_oid = parsed.signature_algorithm.algorithm.to_id_string();
        let signature_algorithm = SignatureAlgorithm::from_oid(&algorithm_oid)
            .ok_or_else(|| Error::request(format!(
                "unsupported signature algorithm {algorithm_oid}"
            )))?;

        let subject = req.subject_name().to_owned().map_err(Error::request)?;
        let mut res = SigningRequest::new(subject, public_key)
            .with_signature_algorithm(signature_algorithm);

        for ext in parsed.requested_extensions().into_iter().flatten() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext {
                for name in &san.general_names {
                    res.add_general_name(name)?;
                }
            }
        }

        Ok(res)
    }

    fn add_general_name(&mut self, name: &GeneralName) -> CertDepotResult<()> {
        match name {
            GeneralName::DNSName(dns) => {
                self.dns_names.push(dns.to_string())
            }
            GeneralName::RFC822Name(email) => {
                self.email_addresses.push(email.to_string())
            }
            GeneralName::URI(uri) => {
                Url::parse(uri).map_err(|e| {
                    Error::request(format!("invalid URI '{uri}': {e}"))
                })?;
                self.uris.push(uri.to_string())
            }
            GeneralName::IPAddress(bytes) => {
                let ip = match bytes.len() {
                    4 => <[u8; 4]>::try_from(*bytes).ok().map(IpAddr::from),
                    16 => <[u8; 16]>::try_from(*bytes).ok().map(IpAddr::from),
                    _ => None,
                };
                let ip = ip.ok_or_else(|| {
                    Error::request("invalid IP address in request")
                })?;
                self.ip_addresses.push(ip)
            }
            _ => { }
        }
        Ok(())
    }
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SigningRequest")
            .field("subject", &name_to_string(&self.subject))
            .field("dns_names", &self.dns_names)
            .field("email_addresses", &self.email_addresses)
            .field("ip_addresses", &self.ip_addresses)
            .field("uris", &self.uris)
            .field("signature_algorithm", &self.signature_algorithm)
            .finish()
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::crypto::common_name;
    use crate::test;

    #[test]
    fn csr_pem_is_converted() {
        let key = test::rsa_key();
        let pem = test::csr_pem(&key, "client1.example.com");
        let req = SigningRequest::from_csr_pem(&pem).unwrap();

        assert_eq!(
            common_name(req.subject()).as_deref(),
            Some("client1.example.com")
        );
        assert!(req.public_key().public_eq(&key));
        assert_eq!(
            req.signature_algorithm(),
            Some(SignatureAlgorithm::Sha256WithRsa)
        );
        assert_eq!(req.dns_names(), ["client1.example.com".to_string()]);
        assert_eq!(req.email_addresses(), ["ops@example.com".to_string()]);
        assert_eq!(
            req.ip_addresses(),
            ["192.0.2.1".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(req.uris(), ["spiffe://example.com/client1".to_string()]);
    }

    #[test]
    fn tampered_csr_is_rejected() {
        let key = test::rsa_key();
        let pem = test::csr_pem(&key, "client1.example.com");
        let mut der = X509Req::from_pem(&pem).unwrap().to_der().unwrap();
        // Flip a bit in the signature at the end.
        let last = der.len() - 1;
        der[last] ^= 0x01;

        let err = SigningRequest::from_csr_der(&der).unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn garbage_is_request_error() {
        let err = SigningRequest::from_csr_pem(b"no request").unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn algorithm_families() {
        assert_eq!(SignatureAlgorithm::Sha384WithRsa.key_type(), Id::RSA);
        assert_eq!(SignatureAlgorithm::EcdsaWithSha256.key_type(), Id::EC);
        assert_eq!(
            SignatureAlgorithm::from_oid("1.2.840.10045.4.3.3"),
            Some(SignatureAlgorithm::EcdsaWithSha384)
        );
        assert_eq!(SignatureAlgorithm::from_oid("1.2.3"), None);
    }
}
