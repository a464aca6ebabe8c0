//! Certificate catalog: one view over all stores.
//!
//! Listing queries every store independently (one slow or broken backend
//! never blocks or fails the others) and joins the results on fingerprint.
//! When two stores expose the same identity, the duplicate is folded into
//! the first entry's `alternate_sources` rather than silently dropped.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;

use crate::certificate::{Certificate, SourceKind};
use crate::error::{Error, Result};
use crate::stores::SourceAdapter;

/// Criteria for filtering certificate listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateFilter {
    /// Restrict to one store kind.
    pub source: Option<SourceKind>,
    /// Only currently valid (non-expired) certificates.
    pub valid_only: bool,
    /// Require a key usage by display name (e.g. "Digital Signature").
    pub required_key_usage: Option<String>,
    /// Case-insensitive substring over name, subject, issuer, and serial.
    pub search: Option<String>,
}

/// Outcome of resolving a fingerprint to a certificate.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The resolved certificate, locator included.
    pub certificate: Certificate,
    /// True when the fingerprint was reachable through more than one store.
    /// The caller decides whether the chosen access path is acceptable.
    pub ambiguous: bool,
}

/// Aggregates the configured stores into one searchable catalog.
pub struct CertificateCatalog {
    adapters: Vec<SourceAdapter>,
    snapshot: Mutex<Vec<Certificate>>,
}

impl CertificateCatalog {
    /// Create a catalog over the given stores.
    pub fn new(adapters: Vec<SourceAdapter>) -> Self {
        Self {
            adapters,
            snapshot: Mutex::new(Vec::new()),
        }
    }

    /// The store of a given kind, if configured.
    pub fn adapter(&self, kind: SourceKind) -> Option<&SourceAdapter> {
        self.adapters.iter().find(|a| a.kind() == kind)
    }

    /// List every discoverable certificate across all stores.
    ///
    /// Stores run on their own threads (each is a blocking chain of native
    /// calls and file IO with no shared state); a store that fails or
    /// panics is skipped.
    pub fn list_all(&self) -> Vec<Certificate> {
        let mut collected = Vec::new();
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .adapters
                .iter()
                .map(|adapter| (adapter.kind(), scope.spawn(move || adapter.list())))
                .collect();
            for (kind, handle) in handles {
                match handle.join() {
                    Ok(mut certs) => collected.append(&mut certs),
                    Err(_) => warn!("certificate store {} failed during listing", kind.name()),
                }
            }
        });

        // The snapshot keeps the raw per-store entries so `resolve` can
        // still hand out the locator of a non-primary access path.
        *self.snapshot.lock().expect("catalog lock poisoned") = collected.clone();
        deduplicate(collected)
    }

    /// List certificates matching the filter.
    pub fn filter(&self, filter: &CertificateFilter) -> Vec<Certificate> {
        self.list_all()
            .into_iter()
            .filter(|cert| matches_filter(cert, filter))
            .collect()
    }

    /// Search over name, subject, issuer, and serial.
    pub fn search(&self, query: &str) -> Vec<Certificate> {
        self.filter(&CertificateFilter {
            search: Some(query.to_string()),
            ..CertificateFilter::default()
        })
    }

    /// Resolve a fingerprint against the last listing (refreshing it when
    /// empty). A caller-preferred store wins when the identity is reachable
    /// through several; otherwise the first listed match is taken and the
    /// ambiguity is reported.
    pub fn resolve(&self, fingerprint: &str, preferred: Option<SourceKind>) -> Result<Resolution> {
        let mut snapshot = {
            let guard = self.snapshot.lock().expect("catalog lock poisoned");
            guard.clone()
        };
        if snapshot.is_empty() {
            self.list_all();
            snapshot = self.snapshot.lock().expect("catalog lock poisoned").clone();
        }

        let matches: Vec<&Certificate> = snapshot
            .iter()
            .filter(|cert| cert.fingerprint == fingerprint)
            .collect();

        let first = *matches
            .first()
            .ok_or_else(|| Error::CertificateNotFound(fingerprint.to_string()))?;

        let chosen = match preferred {
            Some(kind) => matches
                .iter()
                .find(|cert| cert.source == kind)
                .copied()
                .unwrap_or(first),
            None => first,
        };

        Ok(Resolution {
            certificate: chosen.clone(),
            ambiguous: matches.len() > 1,
        })
    }
}

/// Fold duplicate fingerprints into the first occurrence, recording the
/// other stores as alternate access paths.
fn deduplicate(certs: Vec<Certificate>) -> Vec<Certificate> {
    let mut unique: Vec<Certificate> = Vec::with_capacity(certs.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for cert in certs {
        match index.get(&cert.fingerprint) {
            Some(&at) => {
                let kept = &mut unique[at];
                if kept.source != cert.source && !kept.alternate_sources.contains(&cert.source) {
                    kept.alternate_sources.push(cert.source);
                }
            }
            None => {
                index.insert(cert.fingerprint.clone(), unique.len());
                unique.push(cert);
            }
        }
    }
    unique
}

fn matches_filter(cert: &Certificate, filter: &CertificateFilter) -> bool {
    if filter.valid_only && !cert.is_valid {
        return false;
    }
    if let Some(source) = filter.source {
        if cert.source != source && !cert.alternate_sources.contains(&source) {
            return false;
        }
    }
    if let Some(usage) = &filter.required_key_usage {
        if !cert.has_key_usage(usage) {
            return false;
        }
    }
    if let Some(query) = &filter.search {
        let query = query.to_lowercase();
        let haystacks = [
            &cert.name,
            &cert.subject_dn,
            &cert.issuer_dn,
            &cert.serial_number,
        ];
        if !haystacks
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
        {
            return false;
        }
    }
    true
}
