//! Conversion between certificate material and persisted secret records.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use x509_parser::extensions::GeneralName;

use certpilot_common::labels::{DOMAIN, MANAGED, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use certpilot_common::{Domain, ObjectKey};

use crate::authority::IssuedCertificate;
use crate::store::{ObjectMeta, Secret, SecretType};

/// Errors decoding a certificate out of a secret record
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("key {data_key} not found in secret {key}")]
    MissingCertificateData { key: ObjectKey, data_key: String },

    #[error("failed to parse certificate stored in secret {key}: {reason}")]
    MalformedCertificate { key: ObjectKey, reason: String },
}

/// A parsed certificate with its key material
#[derive(Clone)]
pub struct Certificate {
    /// PEM-encoded certificate chain as stored
    pub chain_pem: Vec<u8>,
    /// PEM-encoded private key, when present alongside the chain
    pub key_pem: Option<Vec<u8>>,
    /// DNS names from the leaf certificate's subject alternative names
    pub dns_names: Vec<String>,
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    /// Parse the leaf (first) certificate of a PEM chain
    pub fn from_pem(chain_pem: &[u8]) -> Result<Self, String> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem)
            .map_err(|e| format!("invalid PEM: {}", e))?;
        let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
            .map_err(|e| format!("invalid X.509 certificate: {}", e))?;

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| "certificate expiry out of range".to_string())?;

        let dns_names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(format!("invalid subject alternative names: {}", e)),
        };

        Ok(Self {
            chain_pem: chain_pem.to_vec(),
            key_pem: None,
            dns_names,
            not_after,
        })
    }

    /// Whether the certificate is valid for `host`.
    ///
    /// Only DNS subject alternative names are consulted. Matching is
    /// case-insensitive and a `*.` pattern covers exactly one leftmost
    /// label. A wildcard `host` only matches an identical pattern.
    pub fn verify_hostname(&self, host: &str) -> bool {
        let host = normalize(host);
        if host.is_empty() {
            return false;
        }

        let host_is_pattern = host.contains('*');
        self.dns_names.iter().any(|name| {
            let pattern = normalize(name);
            if host_is_pattern {
                pattern == host
            } else {
                matches_pattern(&pattern, &host)
            }
        })
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("dns_names", &self.dns_names)
            .field("not_after", &self.not_after)
            .field("has_key", &self.key_pem.is_some())
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn matches_pattern(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((first, rest)) => !first.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}

/// Package issued certificate material as a managed TLS secret
pub fn encode(
    issued: &IssuedCertificate,
    domain: &Domain,
    namespace: &str,
    name: &str,
) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(TLS_CERT_KEY.to_string(), issued.cert_pem.as_bytes().to_vec());
    data.insert(
        TLS_PRIVATE_KEY_KEY.to_string(),
        issued.key_pem.as_bytes().to_vec(),
    );

    Secret {
        metadata: ObjectMeta {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: managed_labels(),
            annotations: domain_annotations(domain),
            resource_version: None,
        },
        type_: SecretType::Tls,
        data,
    }
}

/// Extract the certificate stored in `secret`
pub fn decode(secret: &Secret) -> Result<Certificate, CodecError> {
    let chain = secret
        .data
        .get(TLS_CERT_KEY)
        .ok_or_else(|| CodecError::MissingCertificateData {
            key: secret.key(),
            data_key: TLS_CERT_KEY.to_string(),
        })?;

    let mut certificate =
        Certificate::from_pem(chain).map_err(|reason| CodecError::MalformedCertificate {
            key: secret.key(),
            reason,
        })?;
    certificate.key_pem = secret.data.get(TLS_PRIVATE_KEY_KEY).cloned();
    Ok(certificate)
}

pub(crate) fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED.to_string(), "true".to_string())])
}

pub(crate) fn domain_annotations(domain: &Domain) -> BTreeMap<String, String> {
    BTreeMap::from([(DOMAIN.to_string(), domain.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{issued_for, mint_certificate};
    use chrono::Duration;

    #[test]
    fn test_encode_sets_markers() {
        let issued = issued_for(&["app.example.com"], Utc::now() + Duration::days(90));
        let secret = encode(&issued, &Domain::new("app.example.com"), "ns", "app-tls");

        assert_eq!(secret.type_, SecretType::Tls);
        assert!(secret.is_managed());
        assert_eq!(secret.annotation(DOMAIN), Some("app.example.com"));
        assert_eq!(secret.key(), ObjectKey::new("ns", "app-tls"));
        assert_eq!(secret.data[TLS_CERT_KEY], issued.cert_pem.as_bytes());
        assert_eq!(secret.data[TLS_PRIVATE_KEY_KEY], issued.key_pem.as_bytes());
    }

    #[test]
    fn test_decode_reads_sans_and_expiry() {
        let not_after = Utc::now() + Duration::days(45);
        let issued = issued_for(&["app.example.com", "www.example.com"], not_after);
        let secret = encode(&issued, &Domain::new("app.example.com"), "ns", "app-tls");

        let cert = decode(&secret).unwrap();
        assert_eq!(cert.dns_names, vec!["app.example.com", "www.example.com"]);
        assert_eq!(cert.not_after.date_naive(), not_after.date_naive());
        assert!(cert.key_pem.is_some());
    }

    #[test]
    fn test_decode_missing_data() {
        let mut secret = encode(
            &issued_for(&["a.example.com"], Utc::now() + Duration::days(90)),
            &Domain::new("a.example.com"),
            "ns",
            "a",
        );
        secret.data.remove(TLS_CERT_KEY);

        let err = decode(&secret).unwrap_err();
        assert!(matches!(err, CodecError::MissingCertificateData { .. }));
    }

    #[test]
    fn test_decode_malformed_pem() {
        let mut secret = encode(
            &issued_for(&["a.example.com"], Utc::now() + Duration::days(90)),
            &Domain::new("a.example.com"),
            "ns",
            "a",
        );
        secret
            .data
            .insert(TLS_CERT_KEY.to_string(), b"definitely not pem".to_vec());

        let err = decode(&secret).unwrap_err();
        assert!(matches!(err, CodecError::MalformedCertificate { .. }));
    }

    #[test]
    fn test_decode_pem_with_garbage_body() {
        let mut secret = Secret::default();
        secret.data.insert(
            TLS_CERT_KEY.to_string(),
            b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n".to_vec(),
        );

        let err = decode(&secret).unwrap_err();
        assert!(matches!(err, CodecError::MalformedCertificate { .. }));
    }

    #[test]
    fn test_verify_hostname_exact_and_case() {
        let (cert_pem, _) = mint_certificate(&["App.Example.com"], Utc::now() + Duration::days(90));
        let cert = Certificate::from_pem(cert_pem.as_bytes()).unwrap();

        assert!(cert.verify_hostname("app.example.com"));
        assert!(cert.verify_hostname("APP.example.com."));
        assert!(!cert.verify_hostname("other.example.com"));
        assert!(!cert.verify_hostname(""));
    }

    #[test]
    fn test_verify_hostname_wildcard() {
        let (cert_pem, _) = mint_certificate(&["*.example.com"], Utc::now() + Duration::days(90));
        let cert = Certificate::from_pem(cert_pem.as_bytes()).unwrap();

        assert!(cert.verify_hostname("app.example.com"));
        assert!(cert.verify_hostname("*.example.com"));
        assert!(!cert.verify_hostname("example.com"));
        assert!(!cert.verify_hostname("a.b.example.com"));
        assert!(!cert.verify_hostname("*.other.com"));
    }

    #[test]
    fn test_wildcard_host_needs_identical_pattern() {
        let (cert_pem, _) = mint_certificate(&["app.example.com"], Utc::now() + Duration::days(90));
        let cert = Certificate::from_pem(cert_pem.as_bytes()).unwrap();
        assert!(!cert.verify_hostname("*.example.com"));
    }

    #[test]
    fn test_debug_hides_key() {
        let issued = issued_for(&["a.example.com"], Utc::now() + Duration::days(90));
        let secret = encode(&issued, &Domain::new("a.example.com"), "ns", "a");
        let cert = decode(&secret).unwrap();
        let rendered = format!("{:?}", cert);
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
