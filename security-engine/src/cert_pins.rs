//! Certificate pinning
//!
//! Maps a domain to an allow-list of certificate fingerprints. Pinning is
//! opt-in: a domain with no entry verifies successfully. Tightening this to
//! default-deny is a product decision, not one this module makes.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Domain-to-fingerprint allow-list store
pub struct CertificatePinStore {
    pins: RwLock<HashMap<String, HashSet<String>>>,
}

/// Fingerprints arrive in several shapes ("sha256/AB:CD", "ab:cd", "ABCD");
/// comparisons run on a canonical lowercase hex form.
fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .trim()
        .strip_prefix("sha256/")
        .unwrap_or(fingerprint.trim())
        .replace(':', "")
        .to_ascii_lowercase()
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

impl CertificatePinStore {
    pub fn new() -> Self {
        Self {
            pins: RwLock::new(HashMap::new()),
        }
    }

    /// Pin a domain to the given fingerprints, replacing any existing entry
    pub async fn pin(&self, domain: &str, fingerprints: Vec<String>) {
        let normalized: HashSet<String> = fingerprints
            .iter()
            .map(|f| normalize_fingerprint(f))
            .collect();
        let mut pins = self.pins.write().await;
        tracing::info!(
            domain = %domain,
            fingerprints = normalized.len(),
            "Certificate pins updated"
        );
        pins.insert(normalize_domain(domain), normalized);
    }

    /// Verify a certificate fingerprint for a domain.
    ///
    /// Unpinned domains are trusted: the allow-list only constrains domains
    /// that opted in.
    pub async fn verify(&self, domain: &str, fingerprint: &str) -> bool {
        let pins = self.pins.read().await;
        match pins.get(&normalize_domain(domain)) {
            Some(allowed) => {
                let ok = allowed.contains(&normalize_fingerprint(fingerprint));
                if !ok {
                    tracing::warn!(
                        domain = %domain,
                        "Certificate fingerprint rejected by pin set"
                    );
                }
                ok
            }
            None => true,
        }
    }

    /// Remove a domain's pins; returns whether an entry existed
    pub async fn unpin(&self, domain: &str) -> bool {
        let mut pins = self.pins.write().await;
        pins.remove(&normalize_domain(domain)).is_some()
    }

    pub async fn pinned_domains(&self) -> Vec<String> {
        let pins = self.pins.read().await;
        let mut domains: Vec<String> = pins.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Snapshot of the full pin table for export
    pub async fn export(&self) -> HashMap<String, Vec<String>> {
        let pins = self.pins.read().await;
        pins.iter()
            .map(|(domain, fingerprints)| {
                let mut list: Vec<String> = fingerprints.iter().cloned().collect();
                list.sort();
                (domain.clone(), list)
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.pins.write().await.clear();
    }
}

impl Default for CertificatePinStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unpinned_domain_is_trusted() {
        let store = CertificatePinStore::new();
        assert!(store.verify("example.com", "deadbeef").await);
    }

    #[tokio::test]
    async fn pinned_domain_only_trusts_listed_fingerprints() {
        let store = CertificatePinStore::new();
        store
            .pin("api.example.com", vec!["AA:BB:CC".to_string()])
            .await;

        assert!(store.verify("api.example.com", "aabbcc").await);
        assert!(store.verify("api.example.com", "sha256/AA:BB:CC").await);
        assert!(!store.verify("api.example.com", "ddeeff").await);
        // Other domains remain trust-by-default.
        assert!(store.verify("other.example.com", "ddeeff").await);
    }

    #[tokio::test]
    async fn unpin_restores_default_trust() {
        let store = CertificatePinStore::new();
        store.pin("x.io", vec!["0123".to_string()]).await;
        assert!(!store.verify("x.io", "ffff").await);

        assert!(store.unpin("x.io").await);
        assert!(!store.unpin("x.io").await);
        assert!(store.verify("x.io", "ffff").await);
    }

    #[tokio::test]
    async fn domains_are_case_insensitive() {
        let store = CertificatePinStore::new();
        store.pin("API.Example.COM", vec!["0123".to_string()]).await;
        assert!(store.verify("api.example.com", "0123").await);
        assert_eq!(store.pinned_domains().await, vec!["api.example.com"]);
    }
}
