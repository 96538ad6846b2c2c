//! Security manager: the engine's single entry point
//!
//! Mediator over the sub-components. Each incoming event fans out to the
//! behavioral analyzer, threat matcher, rate limiter, and metrics reporter;
//! their verdicts are folded back into the event before the aggregate status
//! is returned. No component depends on this one.

use crate::behavioral::{AnomalyReport, BehavioralAnalyzer, BehavioralProfile};
use crate::cert_pins::CertificatePinStore;
use crate::config::{EngineConfig, OperationClass};
use crate::enclave::{SecureEnclave, SecureEnclaveRegistry};
use crate::metrics::{MetricsReporter, SecurityMetrics, SecurityStatus};
use crate::rate_limit::{RateLimitError, RateLimitInfo, RateLimiter, RateLimiterStats};
use crate::session::{LockoutStatus, Session, SessionError, SessionManager, SessionStats};
use crate::threat::{ThreatMatcher, ThreatPattern};
use chrono::{DateTime, Utc};
use common::{EngineError, SecurityAction, SecurityEvent, SecurityEventKind, SecuritySeverity};
use lazy_static::lazy_static;
use prometheus::{register_counter, register_histogram, Counter, Histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

lazy_static! {
    static ref EVENTS_PROCESSED: Counter = register_counter!(
        "security_engine_events_processed_total",
        "Total security events processed by the engine"
    )
    .unwrap();
    static ref THREATS_MATCHED: Counter = register_counter!(
        "security_engine_threats_matched_total",
        "Events matching a registered threat pattern"
    )
    .unwrap();
    static ref ANOMALIES_FLAGGED: Counter = register_counter!(
        "security_engine_anomalies_flagged_total",
        "Events flagged anomalous by behavioral analysis"
    )
    .unwrap();
    static ref RATE_LIMIT_DENIALS: Counter = register_counter!(
        "security_engine_rate_limit_denials_total",
        "Events denied by the rate limiter"
    )
    .unwrap();
    static ref EVENT_PROCESSING_SECONDS: Histogram = register_histogram!(
        "security_engine_event_processing_seconds",
        "Duration of the event processing pipeline"
    )
    .unwrap();
}

/// Asynchronous sink for processed events. Invoked fire-and-forget after the
/// pipeline completes; a slow or failing hook never blocks event processing.
#[async_trait::async_trait]
pub trait PersistenceHook: Send + Sync {
    async fn persist_event(&self, event: SecurityEvent) -> Result<(), String>;
    fn name(&self) -> &str;
}

/// Audit/debug snapshot of the full engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityExport {
    pub exported_at: DateTime<Utc>,
    pub metrics: SecurityMetrics,
    pub profiles: Vec<BehavioralProfile>,
    pub enclaves: Vec<SecureEnclave>,
    pub sessions: Vec<Session>,
    pub pinned_domains: HashMap<String, Vec<String>>,
    pub rate_limiter: RateLimiterStats,
}

/// Outcome of a caller-driven maintenance pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_sessions: u32,
    pub rate_entries_removed: usize,
    pub enclaves_checked: usize,
    pub enclaves_compromised: usize,
}

/// Orchestrates all security sub-components behind one API
pub struct SecurityManager {
    config: RwLock<EngineConfig>,
    threat_matcher: ThreatMatcher,
    rate_limiter: RateLimiter,
    behavioral: BehavioralAnalyzer,
    sessions: SessionManager,
    enclaves: SecureEnclaveRegistry,
    cert_pins: CertificatePinStore,
    metrics: MetricsReporter,
    hooks: RwLock<Vec<Arc<dyn PersistenceHook>>>,
}

fn escalate(event: &mut SecurityEvent, tag: String) {
    if event.severity < SecuritySeverity::High {
        event.severity = SecuritySeverity::High;
    }
    event.requires_attention = true;
    event.tags.push(tag);
}

/// Text the threat matcher scans: the event's detail values plus the user
/// agent, the fields attacker-controlled input flows through.
fn threat_payload(event: &SecurityEvent) -> String {
    let mut payload = String::new();
    for (key, value) in &event.details {
        payload.push_str(key);
        payload.push('=');
        payload.push_str(value);
        payload.push(' ');
    }
    if let Some(user_agent) = &event.user_agent {
        payload.push_str(user_agent);
    }
    payload
}

impl SecurityManager {
    /// Build the engine from a validated configuration and probe the platform
    /// for secure-enclave capabilities.
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let manager = Self {
            threat_matcher: ThreatMatcher::with_threshold(config.threat_score_threshold),
            rate_limiter: RateLimiter::with_table(config.rate_limits.clone()),
            behavioral: BehavioralAnalyzer::new(),
            sessions: SessionManager::new(),
            enclaves: SecureEnclaveRegistry::new(),
            cert_pins: CertificatePinStore::new(),
            metrics: MetricsReporter::with_capacity(config.max_event_history),
            hooks: RwLock::new(Vec::new()),
            config: RwLock::new(config.clone()),
        };

        manager
            .behavioral
            .set_tuning(
                config.anomaly_threshold,
                config.learning_rate,
                config.learning_window_cap,
            )
            .await;
        manager
            .sessions
            .set_policy(
                config.session_timeout_ms,
                config.max_failed_attempts,
                config.lockout_window_ms,
            )
            .await;
        manager
            .enclaves
            .set_health_threshold(config.enclave_health_threshold)
            .await;
        let registered = manager.enclaves.detect_and_register().await;
        tracing::info!(enclaves = registered, "Security manager initialized");

        Ok(manager)
    }

    pub async fn with_defaults() -> Result<Self, EngineError> {
        Self::new(EngineConfig::default()).await
    }

    /// Process one security event through the full pipeline and return the
    /// refreshed aggregate status.
    ///
    /// A failure inside the pipeline is itself recorded as a high-severity
    /// `security_error` event before being returned to the caller; processing
    /// failures are never silently swallowed.
    pub async fn process_security_event(
        &self,
        mut event: SecurityEvent,
    ) -> Result<SecurityStatus, EngineError> {
        let started = Instant::now();

        if let Err(error) = self.run_pipeline(&mut event).await {
            let synthetic = SecurityEvent::new(
                SecurityEventKind::SecurityError,
                SecuritySeverity::High,
            )
            .with_detail("error", error.to_string())
            .with_detail("source_event", event.id.clone());
            self.metrics.record_event(&synthetic).await;
            tracing::error!(
                event_id = %event.id,
                error = %error,
                "Event processing failed"
            );
            return Err(error);
        }

        let elapsed = started.elapsed();
        self.metrics
            .record_response_time(elapsed.as_secs_f64() * 1000.0)
            .await;
        EVENTS_PROCESSED.inc();
        EVENT_PROCESSING_SECONDS.observe(elapsed.as_secs_f64());

        self.dispatch_hooks(event.clone()).await;

        Ok(self.current_status().await)
    }

    /// The pipeline proper. Every step runs even when an earlier one has
    /// already escalated the event.
    async fn run_pipeline(&self, event: &mut SecurityEvent) -> Result<(), EngineError> {
        self.metrics.record_event(event).await;

        if let Some(principal_id) = event.principal_id.clone() {
            self.behavioral.update_profile(&principal_id, event).await;
        }

        let evaluation = self.threat_matcher.evaluate(&threat_payload(event)).await;
        if evaluation.is_threat {
            let pattern = evaluation
                .matched_pattern
                .clone()
                .unwrap_or_else(|| "unclassified".to_string());
            escalate(event, format!("threat:{pattern}"));
            event.risk_score = event.risk_score.max(evaluation.risk_score);
            if event.action != Some(SecurityAction::Blocked) {
                event.action = Some(SecurityAction::Flagged);
            }
            THREATS_MATCHED.inc();
            tracing::warn!(
                event_id = %event.id,
                pattern = %pattern,
                risk_score = evaluation.risk_score,
                "Threat pattern matched"
            );
        }

        let rate_key = event
            .principal_id
            .clone()
            .or_else(|| event.ip_address.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        let allowed = self
            .rate_limiter
            .check_operation(OperationClass::for_event(event.kind), &rate_key)
            .await
            .map_err(|e| match e {
                RateLimitError::InvalidConfiguration { message } => {
                    EngineError::Configuration { message }
                }
            })?;
        if !allowed {
            escalate(event, "rate-limit-exceeded".to_string());
            event.action = Some(SecurityAction::Blocked);
            RATE_LIMIT_DENIALS.inc();
        }

        if let Some(principal_id) = event.principal_id.clone() {
            if let Ok(report) = self.behavioral.detect_anomalies(&principal_id).await {
                if report.is_anomaly {
                    escalate(event, "anomaly".to_string());
                    event.risk_score = event.risk_score.max(report.confidence);
                    event
                        .details
                        .insert("anomaly_details".to_string(), report.details.join("; "));
                    if event.action.is_none() || event.action == Some(SecurityAction::Allowed) {
                        event.action = Some(SecurityAction::Flagged);
                    }
                    ANOMALIES_FLAGGED.inc();
                }
            }
        }

        self.enclaves.check_health().await;

        if event.action.is_none() {
            event.action = Some(if event.requires_attention {
                SecurityAction::Monitored
            } else {
                SecurityAction::Allowed
            });
        }

        Ok(())
    }

    async fn dispatch_hooks(&self, event: SecurityEvent) {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            let hook = Arc::clone(hook);
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(error) = hook.persist_event(event).await {
                    tracing::warn!(hook = hook.name(), error = %error, "Persistence hook failed");
                }
            });
        }
    }

    /// Aggregate status without processing a new event
    pub async fn current_status(&self) -> SecurityStatus {
        let enclave_health = self.enclaves.overall_health().await;
        self.metrics.generate_status(enclave_health).await
    }

    // -- certificate pinning ------------------------------------------------

    pub async fn pin_certificate(&self, domain: &str, fingerprints: Vec<String>) {
        self.cert_pins.pin(domain, fingerprints).await;
    }

    pub async fn verify_certificate(&self, domain: &str, fingerprint: &str) -> bool {
        self.cert_pins.verify(domain, fingerprint).await
    }

    pub async fn unpin_certificate(&self, domain: &str) -> bool {
        self.cert_pins.unpin(domain).await
    }

    // -- sessions and lockout ----------------------------------------------

    pub async fn create_session(
        &self,
        principal_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Session, SessionError> {
        self.sessions.create_session(principal_id, metadata).await
    }

    pub async fn validate_session(&self, id: &str) -> Result<Session, SessionError> {
        self.sessions.validate_session(id).await
    }

    pub async fn extend_session(
        &self,
        id: &str,
        additional_ms: Option<u64>,
    ) -> Result<Session, SessionError> {
        self.sessions.extend_session(id, additional_ms).await
    }

    pub async fn invalidate_session(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.invalidate_session(id).await
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get_session(id).await
    }

    pub async fn invalidate_all_for_principal(&self, principal_id: &str) -> u32 {
        self.sessions.invalidate_all_for_principal(principal_id).await
    }

    pub async fn record_failed_attempt(
        &self,
        principal_id: &str,
        metadata: HashMap<String, String>,
    ) -> LockoutStatus {
        self.sessions
            .record_failed_attempt(principal_id, metadata)
            .await
    }

    pub async fn is_user_locked(&self, principal_id: &str) -> bool {
        self.sessions.is_user_locked(principal_id).await
    }

    pub async fn reset_failed_attempts(&self, principal_id: &str) {
        self.sessions.reset_failed_attempts(principal_id).await;
    }

    pub async fn session_stats(&self) -> SessionStats {
        self.sessions.session_stats().await
    }

    // -- behavioral --------------------------------------------------------

    pub async fn get_behavioral_profile(&self, principal_id: &str) -> Option<BehavioralProfile> {
        self.behavioral.get_profile(principal_id).await
    }

    pub async fn detect_behavioral_anomalies(
        &self,
        principal_id: &str,
    ) -> Result<AnomalyReport, EngineError> {
        self.behavioral.detect_anomalies(principal_id).await
    }

    pub async fn remove_behavioral_profile(&self, principal_id: &str) -> bool {
        self.behavioral.remove_profile(principal_id).await
    }

    // -- rate limiting -----------------------------------------------------

    pub fn check_limit(
        &self,
        key: &str,
        max_requests: u32,
        window_ms: u64,
    ) -> Result<bool, EngineError> {
        self.rate_limiter
            .check_limit(key, max_requests, window_ms)
            .map_err(|e| match e {
                RateLimitError::InvalidConfiguration { message } => {
                    EngineError::Configuration { message }
                }
            })
    }

    pub fn rate_limit_info(&self, key: &str) -> Option<RateLimitInfo> {
        self.rate_limiter.get_info(key)
    }

    // -- threat patterns ---------------------------------------------------

    pub async fn register_threat_pattern(&self, pattern: ThreatPattern) -> Result<(), EngineError> {
        self.threat_matcher.register_pattern(pattern).await
    }

    pub async fn remove_threat_pattern(&self, id: &str) -> bool {
        self.threat_matcher.remove_pattern(id).await
    }

    // -- hooks, export, config, lifecycle ------------------------------------

    pub async fn add_persistence_hook(&self, hook: Arc<dyn PersistenceHook>) {
        self.hooks.write().await.push(hook);
    }

    /// Serialize the engine's full state for audit or debugging
    pub async fn export_security_data(&self) -> SecurityExport {
        SecurityExport {
            exported_at: Utc::now(),
            metrics: self.metrics.snapshot().await,
            profiles: self.behavioral.export_profiles().await,
            enclaves: self.enclaves.list().await,
            sessions: self.sessions.export_sessions().await,
            pinned_domains: self.cert_pins.export().await,
            rate_limiter: self.rate_limiter.stats(),
        }
    }

    /// The export document rendered as JSON
    pub async fn export_security_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(&self.export_security_data().await).map_err(|e| {
            EngineError::Internal {
                message: e.to_string(),
            }
        })
    }

    /// Swap in a new configuration, propagating tunables to every component
    pub async fn update_config(&self, new_config: EngineConfig) -> Result<(), EngineError> {
        new_config.validate()?;

        self.threat_matcher
            .set_threshold(new_config.threat_score_threshold)
            .await;
        self.behavioral
            .set_tuning(
                new_config.anomaly_threshold,
                new_config.learning_rate,
                new_config.learning_window_cap,
            )
            .await;
        self.sessions
            .set_policy(
                new_config.session_timeout_ms,
                new_config.max_failed_attempts,
                new_config.lockout_window_ms,
            )
            .await;
        self.enclaves
            .set_health_threshold(new_config.enclave_health_threshold)
            .await;
        self.rate_limiter
            .set_table(new_config.rate_limits.clone())
            .await;
        self.metrics.set_capacity(new_config.max_event_history).await;

        *self.config.write().await = new_config;
        tracing::info!("Engine configuration updated");
        Ok(())
    }

    pub async fn get_config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Run the caller-driven maintenance pass: session sweep, rate-limit
    /// sweep, and an enclave health check. Idempotent at any cadence.
    pub async fn maintenance_sweep(&self) -> MaintenanceReport {
        let expired_sessions = self.sessions.cleanup_expired_sessions().await;
        let rate_entries_removed = self.rate_limiter.sweep();
        let health = self.enclaves.check_health().await;

        MaintenanceReport {
            expired_sessions,
            rate_entries_removed,
            enclaves_checked: health.checked,
            enclaves_compromised: health.compromised,
        }
    }

    /// Clear all sub-component state and re-probe enclave capabilities
    pub async fn reset(&self) {
        self.metrics.reset().await;
        self.behavioral.clear().await;
        self.sessions.clear().await;
        self.rate_limiter.clear();
        self.cert_pins.clear().await;
        self.threat_matcher.reset().await;
        self.enclaves.clear().await;
        self.enclaves.detect_and_register().await;
        tracing::info!("Engine state reset");
    }
}
