//! Security event model shared between the engine and its callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kinds of security events the engine ingests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    Authentication,
    Authorization,
    DataAccess,
    System,
    Network,
    Behavioral,
    /// Synthesized internally when event processing itself fails
    SecurityError,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::DataAccess => "data_access",
            Self::System => "system",
            Self::Network => "network",
            Self::Behavioral => "behavioral",
            Self::SecurityError => "security_error",
        }
    }
}

/// Event severity levels, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Disposition the engine assigns to an event while annotating it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    Blocked,
    Flagged,
    Monitored,
    Allowed,
}

/// A discrete security event (login, data access, network call, ...)
///
/// Immutable once created except for the severity and annotation fields the
/// engine may upgrade while processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique event ID
    pub id: String,

    /// Event kind
    pub kind: SecurityEventKind,

    /// Event severity
    pub severity: SecuritySeverity,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Principal associated with the event, if any
    pub principal_id: Option<String>,

    /// Device the event originated from
    pub device_id: Option<String>,

    /// Source IP address
    pub ip_address: Option<String>,

    /// User agent string
    pub user_agent: Option<String>,

    /// Free-form event details
    pub details: HashMap<String, String>,

    /// Risk score in [0, 1]
    pub risk_score: f64,

    /// Disposition assigned during processing
    pub action: Option<SecurityAction>,

    /// Tags added while annotating
    pub tags: Vec<String>,

    /// Whether this event needs immediate operator attention
    pub requires_attention: bool,
}

impl SecurityEvent {
    /// Create an event with a fresh ID and a severity-derived initial risk
    pub fn new(kind: SecurityEventKind, severity: SecuritySeverity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            timestamp: Utc::now(),
            principal_id: None,
            device_id: None,
            ip_address: None,
            user_agent: None,
            details: HashMap::new(),
            risk_score: match severity {
                SecuritySeverity::Low => 0.25,
                SecuritySeverity::Medium => 0.5,
                SecuritySeverity::High => 0.75,
                SecuritySeverity::Critical => 0.95,
            },
            action: None,
            tags: Vec::new(),
            requires_attention: severity >= SecuritySeverity::High,
        }
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = clamp_unit(risk_score);
        self
    }
}

/// Clamp a score to the unit interval; every risk/confidence/health value
/// handed out by the engine passes through this.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
