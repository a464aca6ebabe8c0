// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::match_like_matches_macro)]

//! # Signet
//!
//! Multi-backend digital-signature toolkit: discover X.509 signing
//! identities across three structurally different stores, expose them as
//! one catalog keyed by SHA-256 fingerprint, and sign or verify documents
//! with any of them.
//!
//! ## Certificate stores
//!
//! - **File bundles**: password-encrypted PKCS#12 containers (and plain
//!   certificate files) discovered by walking configured directories
//! - **Hardware tokens**: smart cards and USB tokens reached through
//!   PKCS#11 modules (slots, sessions, object handles, login state)
//! - **Browser store**: the NSS certificate database, reached through the
//!   browser's own soft-token module
//!
//! Each store has different identity semantics, failure modes, and resource
//! lifecycles; all of them surface the same [`Certificate`] snapshot and
//! produce the same short-lived [`Signer`] capability.
//!
//! ## Quick start
//!
//! ```ignore
//! use signet::{SignatureService, SigningConfig, SignRequest};
//! use std::path::Path;
//!
//! # fn main() -> signet::Result<()> {
//! let config = SigningConfig::default();
//! let service = SignatureService::new(&config);
//!
//! // Discover signing identities across every store.
//! for cert in service.search_certificates("Ana") {
//!     println!("{} [{}] {}", cert.name, cert.source.name(), cert.fingerprint);
//! }
//!
//! // Sign with a fingerprint; the owning store is resolved automatically.
//! let signed = service.sign(&SignRequest {
//!     document: Path::new("contract.pdf"),
//!     fingerprint: "3f4c…",
//!     credential: Some("1234"),
//!     profile_id: None,
//!     position_override: None,
//!     preferred_source: None,
//! })?;
//!
//! // Verify what is embedded in a document.
//! for signature in service.verify(&signed)? {
//!     println!("{}: {:?}", signature.signer_name, signature.trust);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Certificate model and fingerprint identity
pub mod certificate;

// The three certificate stores behind one contract
pub mod stores;

// Cross-store catalog: listing, search, fingerprint resolution
pub mod catalog;

// Signature profiles and visible appearances
pub mod appearance;
pub mod profile;

// Document engine boundary and verification mapping
pub mod engine;
pub mod verify;

// Configuration and the caller-facing service
pub mod config;
pub mod service;

pub use catalog::{CertificateCatalog, CertificateFilter, Resolution};
pub use certificate::{fingerprint, Certificate, KeyUsageFlags, SourceKind, SourceLocator};
pub use config::SigningConfig;
pub use engine::{DetachedSignatureEngine, DocumentEngine, RawSignature, SignatureMetadata};
pub use error::{Error, Result};
pub use profile::{SignatureProfile, SignaturePosition, SignatureVisibility};
pub use service::{SignRequest, SignatureService};
pub use stores::{DigestAlgorithm, Signer, SourceAdapter};
pub use verify::{SignatureInfo, SignatureTrust};
