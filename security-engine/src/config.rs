//! Engine configuration
//!
//! All tunables are runtime-configurable through `SecurityManager::update_config`;
//! defaults come from `common::constants` and can be overridden from the
//! environment for deployments that configure through env vars.

use common::constants::{metrics, rate_limiting, security};
use common::{EngineError, SecurityEventKind};
use serde::{Deserialize, Serialize};

/// Logical operation classes with independent rate-limit quotas
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Authentication,
    IdentityCreation,
    Resolution,
    Api,
    UserAction,
    FileUpload,
    Recovery,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::IdentityCreation => "identity_creation",
            Self::Resolution => "resolution",
            Self::Api => "api",
            Self::UserAction => "user_action",
            Self::FileUpload => "file_upload",
            Self::Recovery => "recovery",
        }
    }

    /// Operation class an incoming event is throttled under
    pub fn for_event(kind: SecurityEventKind) -> Self {
        match kind {
            SecurityEventKind::Authentication => Self::Authentication,
            SecurityEventKind::DataAccess | SecurityEventKind::Behavioral => Self::UserAction,
            SecurityEventKind::Authorization
            | SecurityEventKind::System
            | SecurityEventKind::Network
            | SecurityEventKind::SecurityError => Self::Api,
        }
    }
}

/// Quota for a single operation class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub max_requests: u32,
    pub window_ms: u64,
    pub block_duration_ms: u64,
}

impl RateLimitQuota {
    const fn from_pair(pair: (u32, u64)) -> Self {
        Self {
            max_requests: pair.0,
            window_ms: pair.1,
            block_duration_ms: rate_limiting::DEFAULT_BLOCK_DURATION_MS,
        }
    }
}

/// Per-operation-class rate-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitTable {
    pub authentication: RateLimitQuota,
    pub identity_creation: RateLimitQuota,
    pub resolution: RateLimitQuota,
    pub api: RateLimitQuota,
    pub user_action: RateLimitQuota,
    pub file_upload: RateLimitQuota,
    pub recovery: RateLimitQuota,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            authentication: RateLimitQuota::from_pair(rate_limiting::AUTHENTICATION),
            identity_creation: RateLimitQuota::from_pair(rate_limiting::IDENTITY_CREATION),
            resolution: RateLimitQuota::from_pair(rate_limiting::RESOLUTION),
            api: RateLimitQuota::from_pair(rate_limiting::API),
            user_action: RateLimitQuota::from_pair(rate_limiting::USER_ACTION),
            file_upload: RateLimitQuota::from_pair(rate_limiting::FILE_UPLOAD),
            recovery: RateLimitQuota::from_pair(rate_limiting::RECOVERY),
        }
    }
}

impl RateLimitTable {
    pub fn quota(&self, class: OperationClass) -> RateLimitQuota {
        match class {
            OperationClass::Authentication => self.authentication,
            OperationClass::IdentityCreation => self.identity_creation,
            OperationClass::Resolution => self.resolution,
            OperationClass::Api => self.api,
            OperationClass::UserAction => self.user_action,
            OperationClass::FileUpload => self.file_upload,
            OperationClass::Recovery => self.recovery,
        }
    }

    fn quotas_mut(&mut self) -> [(&'static str, &mut RateLimitQuota); 7] {
        [
            ("AUTHENTICATION", &mut self.authentication),
            ("IDENTITY_CREATION", &mut self.identity_creation),
            ("RESOLUTION", &mut self.resolution),
            ("API", &mut self.api),
            ("USER_ACTION", &mut self.user_action),
            ("FILE_UPLOAD", &mut self.file_upload),
            ("RECOVERY", &mut self.recovery),
        ]
    }

    fn validate(&self) -> Result<(), EngineError> {
        for quota in [
            self.authentication,
            self.identity_creation,
            self.resolution,
            self.api,
            self.user_action,
            self.file_upload,
            self.recovery,
        ] {
            if quota.max_requests == 0 || quota.window_ms == 0 {
                return Err(EngineError::Configuration {
                    message: "rate limit quotas require max_requests > 0 and window_ms > 0"
                        .to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Runtime-tunable engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Smoothed-risk / confidence level above which behavior is anomalous
    pub anomaly_threshold: f64,

    /// Exponential-smoothing factor for per-principal risk blending
    pub learning_rate: f64,

    /// Failed attempts within the lockout window before a principal locks
    pub max_failed_attempts: u32,

    /// Trailing window over which failed attempts count, in milliseconds
    pub lockout_window_ms: u64,

    /// Session time-to-live in milliseconds
    pub session_timeout_ms: u64,

    /// Aggregate pattern-match score above which a payload is a threat
    pub threat_score_threshold: f64,

    /// Health score below which an enclave transitions to compromised
    pub enclave_health_threshold: f64,

    /// Maximum retained event summaries per behavioral profile
    pub learning_window_cap: usize,

    /// Maximum retained events in the metrics history ring buffer
    pub max_event_history: usize,

    /// Status reporting interval in milliseconds
    pub reporting_interval_ms: u64,

    /// Per-operation-class rate-limit quotas
    pub rate_limits: RateLimitTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: security::ANOMALY_THRESHOLD,
            learning_rate: security::LEARNING_RATE,
            max_failed_attempts: security::MAX_FAILED_ATTEMPTS,
            lockout_window_ms: security::LOCKOUT_WINDOW_MS,
            session_timeout_ms: security::DEFAULT_SESSION_TIMEOUT_MS,
            threat_score_threshold: security::THREAT_SCORE_THRESHOLD,
            enclave_health_threshold: security::ENCLAVE_HEALTH_THRESHOLD,
            learning_window_cap: security::LEARNING_WINDOW_CAP,
            max_event_history: metrics::MAX_EVENT_HISTORY,
            reporting_interval_ms: metrics::REPORTING_INTERVAL_MS,
            rate_limits: RateLimitTable::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SECURITY_ANOMALY_THRESHOLD") {
            config.anomaly_threshold = val.parse().unwrap_or(config.anomaly_threshold);
        }
        if let Ok(val) = std::env::var("SECURITY_LEARNING_RATE") {
            config.learning_rate = val.parse().unwrap_or(config.learning_rate);
        }
        if let Ok(val) = std::env::var("SECURITY_MAX_FAILED_ATTEMPTS") {
            config.max_failed_attempts = val.parse().unwrap_or(config.max_failed_attempts);
        }
        if let Ok(val) = std::env::var("SECURITY_LOCKOUT_WINDOW_MS") {
            config.lockout_window_ms = val.parse().unwrap_or(config.lockout_window_ms);
        }
        if let Ok(val) = std::env::var("SECURITY_SESSION_TIMEOUT_MS") {
            config.session_timeout_ms = val.parse().unwrap_or(config.session_timeout_ms);
        }
        if let Ok(val) = std::env::var("SECURITY_MAX_EVENT_HISTORY") {
            config.max_event_history = val.parse().unwrap_or(config.max_event_history);
        }

        for (name, quota) in config.rate_limits.quotas_mut() {
            if let Ok(val) = std::env::var(format!("RATE_LIMIT_{name}_MAX_REQUESTS")) {
                quota.max_requests = val.parse().unwrap_or(quota.max_requests);
            }
            if let Ok(val) = std::env::var(format!("RATE_LIMIT_{name}_WINDOW_MS")) {
                quota.window_ms = val.parse().unwrap_or(quota.window_ms);
            }
            if let Ok(val) = std::env::var(format!("RATE_LIMIT_{name}_BLOCK_MS")) {
                quota.block_duration_ms = val.parse().unwrap_or(quota.block_duration_ms);
            }
        }

        config
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.anomaly_threshold) {
            return Err(EngineError::Configuration {
                message: format!(
                    "anomaly_threshold must be in [0, 1], got {}",
                    self.anomaly_threshold
                ),
            });
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EngineError::Configuration {
                message: format!("learning_rate must be in (0, 1], got {}", self.learning_rate),
            });
        }
        if !(0.0..=1.0).contains(&self.threat_score_threshold) {
            return Err(EngineError::Configuration {
                message: format!(
                    "threat_score_threshold must be in [0, 1], got {}",
                    self.threat_score_threshold
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.enclave_health_threshold) {
            return Err(EngineError::Configuration {
                message: format!(
                    "enclave_health_threshold must be in [0, 1], got {}",
                    self.enclave_health_threshold
                ),
            });
        }
        if self.max_failed_attempts == 0 {
            return Err(EngineError::Configuration {
                message: "max_failed_attempts must be at least 1".to_string(),
            });
        }
        if self.lockout_window_ms == 0 || self.session_timeout_ms == 0 {
            return Err(EngineError::Configuration {
                message: "lockout_window_ms and session_timeout_ms must be non-zero".to_string(),
            });
        }
        if self.learning_window_cap == 0 || self.max_event_history == 0 {
            return Err(EngineError::Configuration {
                message: "learning_window_cap and max_event_history must be non-zero".to_string(),
            });
        }
        self.rate_limits.validate()
    }
}
