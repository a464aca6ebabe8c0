//! Detached byte-range signature engine.
//!
//! Each signature is a delimited block appended to the document. The block
//! carries the certificate, the signature over the SHA-2 digest of every
//! byte that precedes the block, the declared metadata, and the appearance
//! descriptor. Appending another signature covers the previous blocks too,
//! so N signatures nest like incremental updates.
//!
//! Output is written to a temporary file and renamed into place, so a
//! failed signing never leaves a partially written document.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::debug;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;
use std::fs;
use std::path::Path;
use x509_parser::oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION};
use x509_parser::prelude::*;

use super::{DocumentEngine, RawSignature, SignatureMetadata};
use crate::appearance::AppearancePayload;
use crate::error::{Error, Result};
use crate::stores::{DigestAlgorithm, Signer};

/// Delimiter that opens a signature block. The payload is a single base64
/// line, so the delimiter can never occur inside a block.
const BLOCK_MARKER: &[u8] = b"\n%%SignetSig: ";

/// Serialized form of one signature block.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureBlock {
    version: u32,
    /// Base64 DER of the signing certificate.
    certificate: String,
    /// Base64 signature bytes.
    signature: String,
    digest_algorithm: String,
    signature_algorithm: String,
    signing_time: DateTime<Utc>,
    name: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    contact_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    appearance: Option<AppearancePayload>,
}

/// Signs and verifies documents with appended detached signature blocks.
pub struct DetachedSignatureEngine {
    digest_algorithm: DigestAlgorithm,
    trusted_roots: Vec<Vec<u8>>,
}

impl DetachedSignatureEngine {
    /// Create an engine signing with SHA-256 and an empty trust set.
    pub fn new() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            trusted_roots: Vec::new(),
        }
    }

    /// Use a different digest algorithm for new signatures.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Add a trusted root certificate (DER).
    pub fn add_trusted_root(&mut self, cert_der: Vec<u8>) {
        self.trusted_roots.push(cert_der);
    }

    fn is_trusted(&self, cert_der: &[u8]) -> bool {
        // Exact-DER membership; chain building is out of scope here.
        self.trusted_roots.iter().any(|root| root == cert_der)
    }
}

impl Default for DetachedSignatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentEngine for DetachedSignatureEngine {
    fn sign_document(
        &self,
        input: &Path,
        output: &Path,
        signer: &mut dyn Signer,
        metadata: &SignatureMetadata,
        appearance: &AppearancePayload,
    ) -> Result<()> {
        let data = fs::read(input)?;

        let digest = compute_digest(&data, self.digest_algorithm);
        let signature = signer.sign(&digest, self.digest_algorithm)?;

        let block = SignatureBlock {
            version: 1,
            certificate: BASE64.encode(signer.certificate_der()),
            signature: BASE64.encode(&signature),
            digest_algorithm: self.digest_algorithm.name().to_string(),
            signature_algorithm: key_algorithm_name(signer.certificate_der()),
            signing_time: metadata.signing_time,
            name: metadata.name.clone(),
            reason: metadata.reason.clone(),
            location: metadata.location.clone(),
            contact_info: metadata.contact_info.clone(),
            appearance: appearance.visible.then(|| appearance.clone()),
        };
        let payload = serde_json::to_vec(&block)
            .map_err(|e| Error::Signing(format!("signature block encoding failed: {e}")))?;

        let mut signed = data;
        signed.extend_from_slice(BLOCK_MARKER);
        signed.extend_from_slice(BASE64.encode(&payload).as_bytes());
        signed.push(b'\n');

        // Write-then-rename keeps a failed sign from leaving a torn file.
        let tmp = output.with_extension("sig.tmp");
        fs::write(&tmp, &signed)?;
        if let Err(e) = fs::rename(&tmp, output) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn verify_document(&self, path: &Path) -> Result<Vec<RawSignature>> {
        let data = fs::read(path)?;

        let mut results = Vec::new();
        for (block_start, payload) in find_blocks(&data) {
            let block = match decode_block(payload) {
                Ok(block) => block,
                Err(e) => {
                    debug!("unreadable signature block at byte {block_start}: {e}");
                    results.push(malformed_block_result());
                    continue;
                }
            };
            results.push(self.check_block(&data[..block_start], &block));
        }
        Ok(results)
    }
}

impl DetachedSignatureEngine {
    fn check_block(&self, signed_bytes: &[u8], block: &SignatureBlock) -> RawSignature {
        let mut messages = Vec::new();

        let certificate_der = BASE64.decode(&block.certificate).unwrap_or_default();
        let signature = BASE64.decode(&block.signature).unwrap_or_default();

        let cryptographically_valid = match DigestAlgorithm::from_name(&block.digest_algorithm) {
            _ if certificate_der.is_empty() || signature.is_empty() => {
                messages.push("signature block is missing certificate or signature".to_string());
                Some(false)
            }
            Some(algorithm) if block.signature_algorithm == "RSA" => {
                let digest = compute_digest(signed_bytes, algorithm);
                match verify_rsa(&certificate_der, &digest, &signature, algorithm) {
                    Ok(valid) => {
                        if !valid {
                            messages.push("document content changed since signing".to_string());
                        }
                        Some(valid)
                    }
                    Err(e) => {
                        messages.push(format!("{e}"));
                        Some(false)
                    }
                }
            }
            Some(_) => {
                messages.push(format!(
                    "signature algorithm '{}' is not supported for verification",
                    block.signature_algorithm
                ));
                None
            }
            None => {
                messages.push(format!(
                    "digest algorithm '{}' is not supported for verification",
                    block.digest_algorithm
                ));
                None
            }
        };

        RawSignature {
            certificate_der: certificate_der.clone(),
            signing_time: Some(block.signing_time),
            digest_algorithm: block.digest_algorithm.clone(),
            signature_algorithm: block.signature_algorithm.clone(),
            cryptographically_valid,
            trusted_root: self.is_trusted(&certificate_der),
            name: Some(block.name.clone()).filter(|n| !n.is_empty()),
            reason: Some(block.reason.clone()).filter(|r| !r.is_empty()),
            location: Some(block.location.clone()).filter(|l| !l.is_empty()),
            contact_info: Some(block.contact_info.clone()).filter(|c| !c.is_empty()),
            messages,
        }
    }
}

fn malformed_block_result() -> RawSignature {
    RawSignature {
        certificate_der: Vec::new(),
        signing_time: None,
        digest_algorithm: String::new(),
        signature_algorithm: String::new(),
        cryptographically_valid: Some(false),
        trusted_root: false,
        name: None,
        reason: None,
        location: None,
        contact_info: None,
        messages: vec!["signature block is malformed".to_string()],
    }
}

/// Locate every signature block: `(block start offset, base64 payload)`.
fn find_blocks(data: &[u8]) -> Vec<(usize, &[u8])> {
    let mut blocks = Vec::new();
    let mut at = 0;
    while at + BLOCK_MARKER.len() <= data.len() {
        let Some(found) = find_from(data, at, BLOCK_MARKER) else {
            break;
        };
        let payload_start = found + BLOCK_MARKER.len();
        let payload_end = data[payload_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| payload_start + i)
            .unwrap_or(data.len());
        blocks.push((found, &data[payload_start..payload_end]));
        at = payload_end;
    }
    blocks
}

fn find_from(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    data[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| from + i)
}

fn decode_block(payload: &[u8]) -> Result<SignatureBlock> {
    let json = BASE64
        .decode(payload)
        .map_err(|e| Error::Verification(format!("invalid block encoding: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::Verification(format!("invalid block structure: {e}")))
}

fn compute_digest(data: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// Name the public-key algorithm of a certificate.
fn key_algorithm_name(cert_der: &[u8]) -> String {
    match parse_x509_certificate(cert_der) {
        Ok((_, cert)) => {
            let oid = &cert.public_key().algorithm.algorithm;
            if *oid == OID_PKCS1_RSAENCRYPTION {
                "RSA".to_string()
            } else if *oid == OID_KEY_TYPE_EC_PUBLIC_KEY {
                "ECDSA".to_string()
            } else {
                oid.to_string()
            }
        }
        Err(_) => "Unknown".to_string(),
    }
}

fn verify_rsa(
    cert_der: &[u8],
    digest: &[u8],
    signature: &[u8],
    algorithm: DigestAlgorithm,
) -> Result<bool> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| Error::Verification(format!("embedded certificate is unreadable: {e}")))?;
    let public_key = RsaPublicKey::from_pkcs1_der(&cert.public_key().subject_public_key.data)
        .map_err(|e| Error::Verification(format!("embedded public key is unreadable: {e}")))?;
    let signature = match RsaSignature::try_from(signature) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };

    let valid = match algorithm {
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public_key)
            .verify_prehash(digest, &signature)
            .is_ok(),
        DigestAlgorithm::Sha384 => VerifyingKey::<Sha384>::new(public_key)
            .verify_prehash(digest, &signature)
            .is_ok(),
        DigestAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(public_key)
            .verify_prehash(digest, &signature)
            .is_ok(),
    };
    Ok(valid)
}
