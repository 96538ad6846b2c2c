//! Secure enclave capability tracking
//!
//! Detects available hardware security capabilities and keeps a health score
//! per enclave. Health re-scoring currently perturbs the score with bounded
//! noise from a system CSPRNG standing in for real attestation; the
//! [`AttestationStrategy`] seam exists so a hardware attestation source can
//! replace it without touching callers. The contract is fixed: scores stay in
//! [0, 1] and an enclave whose score drops below the configured threshold
//! transitions to compromised.

use chrono::{DateTime, Utc};
use common::constants::security;
use common::clamp_unit;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Hardware security capability families
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnclaveKind {
    Tpm,
    Sgx,
    TrustZone,
    SecureEnclave,
}

impl EnclaveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tpm => "tpm",
            Self::Sgx => "sgx",
            Self::TrustZone => "trustzone",
            Self::SecureEnclave => "secure-enclave",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnclaveStatus {
    Active,
    Compromised,
}

/// A registered hardware security capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureEnclave {
    pub id: String,
    pub kind: EnclaveKind,
    pub status: EnclaveStatus,
    pub capabilities: HashSet<String>,
    /// Label of the key store backing this enclave
    pub key_store: String,
    pub last_health_check: DateTime<Utc>,
    pub health_score: f64,
}

/// Pluggable health scoring. Implementations must return a value that is
/// clamped to [0, 1] by the registry before use.
pub trait AttestationStrategy: Send + Sync {
    fn attest(&self, enclave: &SecureEnclave) -> f64;
}

/// Placeholder attestation: perturbs the previous score with bounded noise
/// from the system CSPRNG. Replace with a real attestation check when
/// hardware support lands.
pub struct JitterAttestation {
    rng: SystemRandom,
    amplitude: f64,
}

impl JitterAttestation {
    pub fn new(amplitude: f64) -> Self {
        Self {
            rng: SystemRandom::new(),
            amplitude,
        }
    }
}

impl Default for JitterAttestation {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl AttestationStrategy for JitterAttestation {
    fn attest(&self, enclave: &SecureEnclave) -> f64 {
        let mut bytes = [0u8; 8];
        if self.rng.fill(&mut bytes).is_err() {
            // No entropy, no verdict: keep the previous score.
            return enclave.health_score;
        }
        let unit = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;
        let noise = (unit * 2.0 - 1.0) * self.amplitude;
        enclave.health_score + noise
    }
}

/// Outcome of a registry-wide health sweep
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSweep {
    pub checked: usize,
    pub compromised: usize,
}

/// Registry of detected hardware security capabilities
pub struct SecureEnclaveRegistry {
    enclaves: RwLock<HashMap<String, SecureEnclave>>,
    attestor: Box<dyn AttestationStrategy>,
    health_threshold: RwLock<f64>,
}

fn probe_platform() -> Vec<(EnclaveKind, Vec<&'static str>, &'static str)> {
    let mut detected = Vec::new();

    if cfg!(target_os = "linux") {
        detected.push((
            EnclaveKind::Tpm,
            vec!["key-sealing", "attestation", "random-generation"],
            "tpm-nvram",
        ));
    }
    if cfg!(target_arch = "x86_64") {
        detected.push((
            EnclaveKind::Sgx,
            vec!["enclave-isolation", "remote-attestation", "sealed-storage"],
            "sgx-sealed",
        ));
    }
    if cfg!(target_arch = "aarch64") {
        detected.push((
            EnclaveKind::TrustZone,
            vec!["trusted-execution", "secure-boot", "key-storage"],
            "trustzone-sw",
        ));
    }
    if cfg!(any(target_os = "macos", target_os = "ios")) {
        detected.push((
            EnclaveKind::SecureEnclave,
            vec!["biometric-binding", "key-storage", "attestation"],
            "keychain-sep",
        ));
    }

    detected
}

impl SecureEnclaveRegistry {
    pub fn new() -> Self {
        Self::with_attestor(Box::new(JitterAttestation::default()))
    }

    pub fn with_attestor(attestor: Box<dyn AttestationStrategy>) -> Self {
        Self {
            enclaves: RwLock::new(HashMap::new()),
            attestor,
            health_threshold: RwLock::new(security::ENCLAVE_HEALTH_THRESHOLD),
        }
    }

    /// Probe the platform and register one enclave per detected capability,
    /// each starting at full health. Returns the number registered.
    pub async fn detect_and_register(&self) -> usize {
        let detected = probe_platform();
        let mut enclaves = self.enclaves.write().await;

        for (kind, capabilities, key_store) in &detected {
            let id = format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4());
            tracing::info!(enclave = %id, kind = kind.as_str(), "Secure enclave registered");
            enclaves.insert(
                id.clone(),
                SecureEnclave {
                    id,
                    kind: *kind,
                    status: EnclaveStatus::Active,
                    capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
                    key_store: (*key_store).to_string(),
                    last_health_check: Utc::now(),
                    health_score: 1.0,
                },
            );
        }

        detected.len()
    }

    /// Register an enclave directly (tests, or callers with their own probe)
    pub async fn register(&self, enclave: SecureEnclave) {
        let mut enclaves = self.enclaves.write().await;
        enclaves.insert(enclave.id.clone(), enclave);
    }

    /// Re-score every enclave. An enclave whose score drops below the
    /// threshold transitions to compromised and stays there.
    pub async fn check_health(&self) -> HealthSweep {
        let threshold = *self.health_threshold.read().await;
        let mut enclaves = self.enclaves.write().await;
        let mut sweep = HealthSweep {
            checked: 0,
            compromised: 0,
        };

        for enclave in enclaves.values_mut() {
            sweep.checked += 1;
            enclave.health_score = clamp_unit(self.attestor.attest(enclave));
            enclave.last_health_check = Utc::now();

            if enclave.health_score < threshold && enclave.status == EnclaveStatus::Active {
                enclave.status = EnclaveStatus::Compromised;
                tracing::warn!(
                    enclave = %enclave.id,
                    health = enclave.health_score,
                    "Enclave health below threshold, marking compromised"
                );
            }
            if enclave.status == EnclaveStatus::Compromised {
                sweep.compromised += 1;
            }
        }

        sweep
    }

    /// Mean health across registered enclaves; 1.0 when nothing is registered
    /// (no hardware to distrust).
    pub async fn overall_health(&self) -> f64 {
        let enclaves = self.enclaves.read().await;
        if enclaves.is_empty() {
            return 1.0;
        }
        let sum: f64 = enclaves.values().map(|e| e.health_score).sum();
        clamp_unit(sum / enclaves.len() as f64)
    }

    pub async fn get(&self, id: &str) -> Option<SecureEnclave> {
        self.enclaves.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<SecureEnclave> {
        let mut list: Vec<SecureEnclave> = self.enclaves.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn set_health_threshold(&self, threshold: f64) {
        *self.health_threshold.write().await = clamp_unit(threshold);
    }

    pub async fn clear(&self) {
        self.enclaves.write().await.clear();
    }
}

impl Default for SecureEnclaveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAttestation(f64);

    impl AttestationStrategy for FixedAttestation {
        fn attest(&self, _enclave: &SecureEnclave) -> f64 {
            self.0
        }
    }

    fn test_enclave(id: &str) -> SecureEnclave {
        SecureEnclave {
            id: id.to_string(),
            kind: EnclaveKind::Tpm,
            status: EnclaveStatus::Active,
            capabilities: HashSet::new(),
            key_store: "tpm-nvram".to_string(),
            last_health_check: Utc::now(),
            health_score: 1.0,
        }
    }

    #[tokio::test]
    async fn health_scores_stay_in_unit_interval() {
        let registry = SecureEnclaveRegistry::with_attestor(Box::new(FixedAttestation(3.5)));
        registry.register(test_enclave("e1")).await;
        registry.check_health().await;

        let enclave = registry.get("e1").await.unwrap();
        assert_eq!(enclave.health_score, 1.0);
        assert_eq!(enclave.status, EnclaveStatus::Active);
    }

    #[tokio::test]
    async fn low_health_marks_enclave_compromised() {
        let registry = SecureEnclaveRegistry::with_attestor(Box::new(FixedAttestation(0.4)));
        registry.register(test_enclave("e1")).await;

        let sweep = registry.check_health().await;
        assert_eq!(sweep.checked, 1);
        assert_eq!(sweep.compromised, 1);

        let enclave = registry.get("e1").await.unwrap();
        assert_eq!(enclave.status, EnclaveStatus::Compromised);
        assert_eq!(enclave.health_score, 0.4);
    }

    #[tokio::test]
    async fn empty_registry_reports_full_health() {
        let registry = SecureEnclaveRegistry::new();
        assert_eq!(registry.overall_health().await, 1.0);
    }

    #[tokio::test]
    async fn jitter_keeps_healthy_enclave_near_full_health() {
        let registry = SecureEnclaveRegistry::new();
        registry.register(test_enclave("e1")).await;
        registry.check_health().await;

        let enclave = registry.get("e1").await.unwrap();
        // One jitter step moves at most 0.1 from 1.0.
        assert!(enclave.health_score >= 0.9);
    }

    #[tokio::test]
    async fn detect_registers_platform_capabilities() {
        let registry = SecureEnclaveRegistry::new();
        let count = registry.detect_and_register().await;
        assert_eq!(registry.list().await.len(), count);
        for enclave in registry.list().await {
            assert_eq!(enclave.status, EnclaveStatus::Active);
            assert_eq!(enclave.health_score, 1.0);
            assert!(!enclave.capabilities.is_empty());
        }
    }
}
