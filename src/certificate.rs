//! Certificate model and fingerprint identity.
//!
//! Every backend converts its native certificate representation into the
//! [`Certificate`] snapshot defined here, and every backend computes identity
//! through the same [`fingerprint`] function, so the same physical
//! certificate discovered through two different stores always joins on an
//! identical fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// Compute the canonical identity of a certificate: lower-case hex SHA-256
/// over its DER encoding.
///
/// This is the only place identity is computed. Two [`Certificate`]s with the
/// same fingerprint are the same identity, regardless of which store exposed
/// them.
pub fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    bytes_to_hex(&hasher.finalize())
}

/// Convert bytes to a lower-case hex string.
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789abcdef";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

/// Which kind of store a certificate was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Password-encrypted certificate+key bundle on disk (PKCS#12).
    FileBundle,
    /// Hardware security token reached through a PKCS#11 module.
    HardwareToken,
    /// Browser (NSS) certificate database.
    BrowserStore,
}

impl SourceKind {
    /// Human-readable name, used in filters and messages.
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::FileBundle => "file-bundle",
            SourceKind::HardwareToken => "hardware-token",
            SourceKind::BrowserStore => "browser-store",
        }
    }
}

/// Backend-opaque handle needed to reopen a certificate for signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SourceLocator {
    /// Path to a PKCS#12 file.
    #[serde(rename = "fileBundle")]
    FileBundle {
        /// Bundle file on disk.
        path: PathBuf,
    },
    /// PKCS#11 coordinates of a token object.
    #[serde(rename = "hardwareToken")]
    HardwareToken {
        /// Path of the native module that exposes the token.
        module_path: PathBuf,
        /// Label of the slot's token.
        slot_label: String,
        /// Label of the certificate object.
        object_label: String,
    },
    /// Nickname of a browser-store entry.
    #[serde(rename = "browserStore")]
    BrowserStore {
        /// Certificate nickname in the database.
        nickname: String,
    },
}

bitflags::bitflags! {
    /// X.509 key-usage bits relevant to signing and encryption.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct KeyUsageFlags: u16 {
        /// digitalSignature
        const DIGITAL_SIGNATURE = 1 << 0;
        /// nonRepudiation / contentCommitment
        const NON_REPUDIATION = 1 << 1;
        /// keyEncipherment
        const KEY_ENCIPHERMENT = 1 << 2;
        /// dataEncipherment
        const DATA_ENCIPHERMENT = 1 << 3;
        /// keyAgreement
        const KEY_AGREEMENT = 1 << 4;
        /// keyCertSign
        const CERT_SIGN = 1 << 5;
        /// cRLSign
        const CRL_SIGN = 1 << 6;
        /// encipherOnly
        const ENCIPHER_ONLY = 1 << 7;
        /// decipherOnly
        const DECIPHER_ONLY = 1 << 8;
    }
}

impl KeyUsageFlags {
    /// Display names for the set bits, matching the names shown to users.
    pub fn names(&self) -> Vec<&'static str> {
        let table = [
            (KeyUsageFlags::DIGITAL_SIGNATURE, "Digital Signature"),
            (KeyUsageFlags::NON_REPUDIATION, "Non Repudiation"),
            (KeyUsageFlags::KEY_ENCIPHERMENT, "Key Encipherment"),
            (KeyUsageFlags::DATA_ENCIPHERMENT, "Data Encipherment"),
            (KeyUsageFlags::KEY_AGREEMENT, "Key Agreement"),
            (KeyUsageFlags::CERT_SIGN, "Certificate Sign"),
            (KeyUsageFlags::CRL_SIGN, "CRL Sign"),
            (KeyUsageFlags::ENCIPHER_ONLY, "Encipher Only"),
            (KeyUsageFlags::DECIPHER_ONLY, "Decipher Only"),
        ];
        table
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Case-insensitive match against a display name.
    pub fn has_usage_named(&self, usage: &str) -> bool {
        self.names().iter().any(|n| n.eq_ignore_ascii_case(usage))
    }
}

/// Immutable snapshot of one signing identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Display name (subject CN, falling back to the file name).
    pub name: String,
    /// Full subject distinguished name.
    pub subject_dn: String,
    /// Full issuer distinguished name.
    pub issuer_dn: String,
    /// Decimal serial number.
    pub serial_number: String,
    /// Start of the validity window.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of the validity window.
    pub valid_to: Option<DateTime<Utc>>,
    /// SHA-256 over the DER encoding; the cross-store identity key.
    pub fingerprint: String,
    /// Which store exposed this certificate.
    pub source: SourceKind,
    /// Key-usage bits.
    pub key_usage: KeyUsageFlags,
    /// Whether now falls inside the validity window.
    pub is_valid: bool,
    /// Whether this is a CA certificate (filtered out of listings).
    pub is_ca: bool,
    /// Whether a PIN/password is needed to use the private key.
    pub requires_credential: bool,
    /// Whether an empty credential may be accepted.
    pub credential_optional: bool,
    /// Handle needed to reopen this certificate for signing.
    pub locator: SourceLocator,
    /// Other stores that exposed the same fingerprint. De-duplication never
    /// silently prefers one access path; the alternatives stay visible.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_sources: Vec<SourceKind>,
}

impl Certificate {
    /// Build a certificate snapshot from DER bytes.
    ///
    /// `fallback_name` is used when the subject has no common name (the
    /// original behavior: file name, then "Unknown Certificate").
    pub fn from_der(
        der: &[u8],
        source: SourceKind,
        locator: SourceLocator,
        fallback_name: Option<&str>,
    ) -> Result<Certificate> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| Error::Structural(format!("X.509 parse error: {e}")))?;

        let name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
            .or_else(|| fallback_name.map(str::to_string))
            .unwrap_or_else(|| "Unknown Certificate".to_string());

        let valid_from = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0);
        let valid_to = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0);

        let now = Utc::now();
        let is_valid = match (valid_from, valid_to) {
            (Some(from), Some(to)) => now >= from && now <= to,
            _ => false,
        };

        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false);

        Ok(Certificate {
            name,
            subject_dn: cert.subject().to_string(),
            issuer_dn: cert.issuer().to_string(),
            serial_number: cert.serial.to_string(),
            valid_from,
            valid_to,
            fingerprint: fingerprint(der),
            source,
            key_usage: extract_key_usage(&cert),
            is_valid,
            is_ca,
            requires_credential: false,
            credential_optional: false,
            locator,
            alternate_sources: Vec::new(),
        })
    }

    /// Whether the certificate can produce signatures.
    ///
    /// Derived from key usage, never stored, so it cannot diverge from the
    /// flags.
    pub fn can_sign(&self) -> bool {
        self.key_usage.contains(KeyUsageFlags::DIGITAL_SIGNATURE)
            || self.key_usage.contains(KeyUsageFlags::NON_REPUDIATION)
    }

    /// Case-insensitive key-usage check by display name.
    pub fn has_key_usage(&self, usage: &str) -> bool {
        self.key_usage.has_usage_named(usage)
    }

    /// Whether a point in time falls inside the validity window.
    pub fn valid_at(&self, when: DateTime<Utc>) -> bool {
        match (self.valid_from, self.valid_to) {
            (Some(from), Some(to)) => when >= from && when <= to,
            _ => false,
        }
    }
}

fn extract_key_usage(cert: &X509Certificate<'_>) -> KeyUsageFlags {
    let mut flags = KeyUsageFlags::empty();
    if let Ok(Some(ku)) = cert.key_usage() {
        let ku = ku.value;
        if ku.digital_signature() {
            flags |= KeyUsageFlags::DIGITAL_SIGNATURE;
        }
        if ku.non_repudiation() {
            flags |= KeyUsageFlags::NON_REPUDIATION;
        }
        if ku.key_encipherment() {
            flags |= KeyUsageFlags::KEY_ENCIPHERMENT;
        }
        if ku.data_encipherment() {
            flags |= KeyUsageFlags::DATA_ENCIPHERMENT;
        }
        if ku.key_agreement() {
            flags |= KeyUsageFlags::KEY_AGREEMENT;
        }
        if ku.key_cert_sign() {
            flags |= KeyUsageFlags::CERT_SIGN;
        }
        if ku.crl_sign() {
            flags |= KeyUsageFlags::CRL_SIGN;
        }
        if ku.encipher_only() {
            flags |= KeyUsageFlags::ENCIPHER_ONLY;
        }
        if ku.decipher_only() {
            flags |= KeyUsageFlags::DECIPHER_ONLY;
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNING_CERT: &[u8] = include_bytes!("../tests/fixtures/signing_cert.der");
    const ENCIPHER_CERT: &[u8] = include_bytes!("../tests/fixtures/encipher_cert.der");

    fn file_locator() -> SourceLocator {
        SourceLocator::FileBundle {
            path: PathBuf::from("/tmp/test.p12"),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(SIGNING_CERT);
        let b = fingerprint(SIGNING_CERT);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_differs_between_certificates() {
        assert_ne!(fingerprint(SIGNING_CERT), fingerprint(ENCIPHER_CERT));
    }

    #[test]
    fn test_from_der_extracts_metadata() {
        let cert = Certificate::from_der(
            SIGNING_CERT,
            SourceKind::FileBundle,
            file_locator(),
            None,
        )
        .unwrap();
        assert_eq!(cert.name, "Ana Torres");
        assert!(cert.subject_dn.contains("Signet Test"));
        assert!(cert.can_sign());
        assert!(cert.key_usage.contains(KeyUsageFlags::DIGITAL_SIGNATURE));
        assert!(cert.key_usage.contains(KeyUsageFlags::NON_REPUDIATION));
        assert!(!cert.is_ca);
        assert_eq!(cert.fingerprint, fingerprint(SIGNING_CERT));
    }

    #[test]
    fn test_can_sign_is_derived_from_usage() {
        let cert = Certificate::from_der(
            ENCIPHER_CERT,
            SourceKind::FileBundle,
            file_locator(),
            None,
        )
        .unwrap();
        assert!(!cert.can_sign());
        assert!(cert.has_key_usage("key encipherment"));
        assert!(!cert.has_key_usage("digital signature"));
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        let err = Certificate::from_der(
            b"not a certificate",
            SourceKind::FileBundle,
            file_locator(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn test_valid_at_uses_given_time() {
        let cert = Certificate::from_der(
            SIGNING_CERT,
            SourceKind::FileBundle,
            file_locator(),
            None,
        )
        .unwrap();
        let before = cert.valid_from.unwrap() - chrono::Duration::days(1);
        let inside = cert.valid_from.unwrap() + chrono::Duration::days(1);
        assert!(!cert.valid_at(before));
        assert!(cert.valid_at(inside));
    }

    #[test]
    fn test_key_usage_names() {
        let flags = KeyUsageFlags::DIGITAL_SIGNATURE | KeyUsageFlags::NON_REPUDIATION;
        let names = flags.names();
        assert_eq!(names, vec!["Digital Signature", "Non Repudiation"]);
        assert!(flags.has_usage_named("DIGITAL SIGNATURE"));
    }
}
