//! Reporting issued certificates to the distribution authority.
//!
//! The authority keeps track of which certificate is current for each name.
//! It receives every newly issued certificate as a JSON document and answers
//! with `200 OK` if it took it.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use openssl::x509::X509Ref;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::commons::CertDepotResult;
use crate::commons::crypto;
use crate::commons::error::Error;
use crate::commons::httpclient;
use crate::constants::distribution_timeout;


//------------ Token ---------------------------------------------------------

/// The bearer token authorizing calls to the authority.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Token(String);

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}


//------------ DistributionConfig --------------------------------------------

#[derive(Clone, Debug)]
pub struct DistributionConfig {
    pub uri: Url,
    pub token: Token,
    pub timeout: Duration,
}

impl DistributionConfig {
    /// Creates a config with the default timeout.
    pub fn new(uri: Url, token: impl Into<Token>) -> Self {
        DistributionConfig {
            uri,
            token: token.into(),
            timeout: distribution_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}


//------------ DistributionClient --------------------------------------------

/// Posts certificates to the distribution authority.
#[derive(Debug)]
pub struct DistributionClient {
    config: DistributionConfig,
    client: reqwest::blocking::Client,
}

impl DistributionClient {
    #[allow(clippy::result_large_err)]
    pub fn build(config: DistributionConfig) -> Result<Self, httpclient::Error> {
        let client = httpclient::client(config.uri.as_str(), config.timeout)?;
        Ok(DistributionClient { config, client })
    }

    pub fn uri(&self) -> &Url {
        &self.config.uri
    }

    /// Sends the request, failing unless the authority answers `200 OK`.
    #[allow(clippy::result_large_err)]
    pub fn distribute(
        &self, request: &DistributionRequest,
    ) -> Result<(), httpclient::Error> {
        debug!(
            "Distributing certificate {} for '{}' to {}",
            request.cert.serial_number, request.name, self.config.uri
        );
        httpclient::post_json_with_bearer(
            &self.client,
            self.config.uri.as_str(),
            request,
            self.config.token.as_ref(),
        )
    }
}


//------------ DistributionRequest -------------------------------------------

/// The JSON document describing a newly issued certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRequest {
    pub name: String,
    pub allow_time: u32,
    pub pem: String,
    pub cert: CertInfo,
}

impl DistributionRequest {
    pub fn new(
        name: &str, allow_time: u32, cert: &X509Ref,
    ) -> CertDepotResult<Self> {
        let pem = cert.to_pem().map_err(Error::signing)?;
        let pem = String::from_utf8_lossy(&pem).into_owned();
        Ok(DistributionRequest {
            name: name.to_string(),
            allow_time,
            pem,
            cert: CertInfo::from_cert(cert)?,
        })
    }
}


//------------ CertInfo ------------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertInfo {
    pub serial_number: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub dns_names: Vec<String>,
    pub email_addresses: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub uris: Vec<String>,
}

impl CertInfo {
    pub fn from_cert(cert: &X509Ref) -> CertDepotResult<Self> {
        let mut info = CertInfo {
            serial_number: crypto::serial_hex(cert).map_err(Error::signing)?,
            subject: crypto::name_to_string(cert.subject_name()),
            issuer: crypto::name_to_string(cert.issuer_name()),
            not_before: crypto::to_utc(cert.not_before())?,
            not_after: crypto::to_utc(cert.not_after())?,
            dns_names: Vec::new(),
            email_addresses: Vec::new(),
            ip_addresses: Vec::new(),
            uris: Vec::new(),
        };

        for name in cert.subject_alt_names().iter().flatten() {
            if let Some(dns) = name.dnsname() {
                info.dns_names.push(dns.to_string());
            }
            else if let Some(email) = name.email() {
                info.email_addresses.push(email.to_string());
            }
            else if let Some(uri) = name.uri() {
                info.uris.push(uri.to_string());
            }
            else if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                info.ip_addresses.push(ip);
            }
        }
        Ok(info)
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test;

    #[test]
    fn token_is_redacted() {
        let config = DistributionConfig::new(
            Url::parse("https://ra.example.net/certs").unwrap(),
            "very-secret-token",
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-token"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn request_json_uses_camel_case() {
        let (cert, _) = crypto::create_ca("client1.example.com", 30).unwrap();
        let request = DistributionRequest::new(
            "client1.example.com", 14, &cert
        ).unwrap();

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["name"], json!("client1.example.com"));
        assert_eq!(value["allowTime"], json!(14));
        assert!(value["pem"].as_str().unwrap()
            .starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(
            value["cert"]["serialNumber"],
            json!(crypto::serial_hex(&cert).unwrap())
        );
        assert_eq!(value["cert"]["subject"], json!("CN=client1.example.com"));
        assert!(value["cert"]["notAfter"].is_string());
        assert_eq!(value["cert"]["dnsNames"], json!([]));
    }

    #[test]
    fn cert_info_collects_alt_names() {
        let cert = test::cert_with_alt_names();
        let info = CertInfo::from_cert(&cert).unwrap();
        assert_eq!(info.dns_names, vec!["client1.example.com"]);
        assert_eq!(info.email_addresses, vec!["ops@example.com"]);
        assert_eq!(
            info.ip_addresses,
            vec!["192.0.2.1".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(info.uris, vec!["spiffe://example.com/client1"]);
    }

    #[test]
    fn unreachable_authority_is_execute_error() {
        let client = test::unreachable_distribution();
        let (cert, _) = crypto::create_ca("client", 1).unwrap();
        let request = DistributionRequest::new("client", 14, &cert).unwrap();
        let err = client.distribute(&request).unwrap_err();
        assert!(matches!(err, httpclient::Error::RequestExecute(..)), "{err}");
    }
}
