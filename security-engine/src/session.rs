use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use common::constants::security;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Session lifecycle: `created -> active -> (expired | invalidated)`, both
/// terminal. Sessions are flagged inactive rather than removed so the full
/// history stays auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub principal_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub metadata: HashMap<String, String>,
    pub is_active: bool,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Random generation failed")]
    RandomGenerationFailed,
    #[error("Session not found")]
    NotFound,
    #[error("Session is inactive")]
    Inactive,
    #[error("Session expired")]
    Expired,
}

/// One failed authentication attempt for a principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Lockout state after recording (or querying) failed attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutStatus {
    pub is_locked: bool,
    pub remaining_attempts: u32,
    /// When the lockout lifts, measured from the oldest attempt still in window
    pub lockout_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub tracked_principals: usize,
    pub locked_principals: usize,
}

#[derive(Debug, Clone, Copy)]
struct SessionPolicy {
    session_timeout_ms: u64,
    max_failed_attempts: u32,
    lockout_window_ms: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_timeout_ms: security::DEFAULT_SESSION_TIMEOUT_MS,
            max_failed_attempts: security::MAX_FAILED_ATTEMPTS,
            lockout_window_ms: security::LOCKOUT_WINDOW_MS,
        }
    }
}

/// Owns session lifecycle and failed-attempt lockout bookkeeping
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    principal_sessions: RwLock<HashMap<String, Vec<String>>>,
    failed_attempts: RwLock<HashMap<String, Vec<FailedAttempt>>>,
    rng: SystemRandom,
    policy: RwLock<SessionPolicy>,
}

fn take_field(metadata: &mut HashMap<String, String>, key: &str) -> Option<String> {
    metadata.remove(key)
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            principal_sessions: RwLock::new(HashMap::new()),
            failed_attempts: RwLock::new(HashMap::new()),
            rng: SystemRandom::new(),
            policy: RwLock::new(SessionPolicy::default()),
        }
    }

    /// Generate a 256-bit session ID, base64url-encoded
    fn generate_session_id(&self) -> Result<String, SessionError> {
        let mut bytes = [0u8; 32];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| SessionError::RandomGenerationFailed)?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub async fn create_session(
        &self,
        principal_id: &str,
        mut metadata: HashMap<String, String>,
    ) -> Result<Session, SessionError> {
        let policy = *self.policy.read().await;
        let id = self.generate_session_id()?;
        let now = Utc::now();

        let session = Session {
            id: id.clone(),
            principal_id: principal_id.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::milliseconds(policy.session_timeout_ms as i64),
            ip_address: take_field(&mut metadata, "ip_address"),
            user_agent: take_field(&mut metadata, "user_agent"),
            location: take_field(&mut metadata, "location"),
            metadata,
            is_active: true,
        };

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), session.clone());
        }
        {
            let mut principal_sessions = self.principal_sessions.write().await;
            principal_sessions
                .entry(principal_id.to_string())
                .or_default()
                .push(id.clone());
        }

        tracing::info!(
            session_id = %id,
            principal_id = %principal_id,
            expires_at = %session.expires_at,
            "Session created"
        );

        Ok(session)
    }

    /// Validate a session by ID. Expiry is detected here: the session is
    /// flagged inactive and the caller gets `Expired`. On success the
    /// session's `last_activity` is refreshed.
    pub async fn validate_session(&self, id: &str) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::NotFound)?;

        if !session.is_active {
            return Err(SessionError::Inactive);
        }

        let now = Utc::now();
        if now > session.expires_at {
            session.is_active = false;
            tracing::info!(
                session_id = %id,
                principal_id = %session.principal_id,
                "Session expired during validation"
            );
            return Err(SessionError::Expired);
        }

        session.last_activity = now;
        Ok(session.clone())
    }

    /// Push an active session's expiry forward. `expires_at` only ever moves
    /// forward through this call; omitting `additional_ms` extends by the
    /// configured session timeout.
    pub async fn extend_session(
        &self,
        id: &str,
        additional_ms: Option<u64>,
    ) -> Result<Session, SessionError> {
        let policy = *self.policy.read().await;
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::NotFound)?;

        if !session.is_active {
            return Err(SessionError::Inactive);
        }
        if Utc::now() > session.expires_at {
            session.is_active = false;
            return Err(SessionError::Expired);
        }

        let additional = additional_ms.unwrap_or(policy.session_timeout_ms).max(1);
        session.expires_at += Duration::milliseconds(additional as i64);

        tracing::debug!(
            session_id = %id,
            expires_at = %session.expires_at,
            "Session extended"
        );
        Ok(session.clone())
    }

    pub async fn invalidate_session(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        session.is_active = false;
        tracing::info!(
            session_id = %id,
            principal_id = %session.principal_id,
            "Session invalidated"
        );
        Ok(())
    }

    /// Invalidate every session belonging to a principal; returns the count
    pub async fn invalidate_all_for_principal(&self, principal_id: &str) -> u32 {
        let principal_sessions = self.principal_sessions.read().await;
        let Some(ids) = principal_sessions.get(principal_id) else {
            return 0;
        };

        let mut sessions = self.sessions.write().await;
        let mut invalidated = 0;
        for id in ids {
            if let Some(session) = sessions.get_mut(id) {
                if session.is_active {
                    session.is_active = false;
                    invalidated += 1;
                }
            }
        }

        tracing::info!(
            principal_id = %principal_id,
            count = invalidated,
            "All sessions invalidated for principal"
        );
        invalidated
    }

    /// Record a failed attempt and report the resulting lockout state.
    /// Attempts older than the lockout window are pruned before counting.
    pub async fn record_failed_attempt(
        &self,
        principal_id: &str,
        mut metadata: HashMap<String, String>,
    ) -> LockoutStatus {
        let policy = *self.policy.read().await;
        let now = Utc::now();
        let window = Duration::milliseconds(policy.lockout_window_ms as i64);

        let mut attempts = self.failed_attempts.write().await;
        let list = attempts.entry(principal_id.to_string()).or_default();

        list.push(FailedAttempt {
            timestamp: now,
            ip_address: take_field(&mut metadata, "ip_address"),
            user_agent: take_field(&mut metadata, "user_agent"),
            location: take_field(&mut metadata, "location"),
            metadata,
        });
        list.retain(|attempt| now - attempt.timestamp < window);

        let count = list.len() as u32;
        let is_locked = count >= policy.max_failed_attempts;
        let lockout_end = if is_locked {
            list.first().map(|oldest| oldest.timestamp + window)
        } else {
            None
        };

        if is_locked {
            tracing::warn!(
                principal_id = %principal_id,
                attempts = count,
                "Principal locked out after repeated failed attempts"
            );
        }

        LockoutStatus {
            is_locked,
            remaining_attempts: policy.max_failed_attempts.saturating_sub(count),
            lockout_end,
        }
    }

    /// Windowed lockout check; prunes stale attempts but records nothing
    pub async fn is_user_locked(&self, principal_id: &str) -> bool {
        let policy = *self.policy.read().await;
        let now = Utc::now();
        let window = Duration::milliseconds(policy.lockout_window_ms as i64);

        let mut attempts = self.failed_attempts.write().await;
        let Some(list) = attempts.get_mut(principal_id) else {
            return false;
        };
        list.retain(|attempt| now - attempt.timestamp < window);
        list.len() as u32 >= policy.max_failed_attempts
    }

    /// Clear failed-attempt history, e.g. after successful re-authentication
    pub async fn reset_failed_attempts(&self, principal_id: &str) {
        let mut attempts = self.failed_attempts.write().await;
        if attempts.remove(principal_id).is_some() {
            tracing::info!(principal_id = %principal_id, "Failed-attempt history reset");
        }
    }

    /// Flag expired-but-still-active sessions inactive. Safe to call at any
    /// cadence; with no new activity a second sweep changes nothing.
    pub async fn cleanup_expired_sessions(&self) -> u32 {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let mut swept = 0;

        for session in sessions.values_mut() {
            if session.is_active && now > session.expires_at {
                session.is_active = false;
                swept += 1;
            }
        }

        if swept > 0 {
            tracing::info!(count = swept, "Expired sessions swept");
        }
        swept
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn sessions_for_principal(&self, principal_id: &str) -> Vec<Session> {
        let principal_sessions = self.principal_sessions.read().await;
        let Some(ids) = principal_sessions.get(principal_id) else {
            return Vec::new();
        };
        let sessions = self.sessions.read().await;
        ids.iter()
            .filter_map(|id| sessions.get(id).cloned())
            .collect()
    }

    pub async fn session_stats(&self) -> SessionStats {
        let policy = *self.policy.read().await;
        let now = Utc::now();
        let window = Duration::milliseconds(policy.lockout_window_ms as i64);

        let sessions = self.sessions.read().await;
        let attempts = self.failed_attempts.read().await;

        SessionStats {
            total_sessions: sessions.len(),
            active_sessions: sessions.values().filter(|s| s.is_active).count(),
            tracked_principals: self.principal_sessions.read().await.len(),
            locked_principals: attempts
                .values()
                .filter(|list| {
                    list.iter()
                        .filter(|attempt| now - attempt.timestamp < window)
                        .count() as u32
                        >= policy.max_failed_attempts
                })
                .count(),
        }
    }

    pub async fn export_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn set_policy(
        &self,
        session_timeout_ms: u64,
        max_failed_attempts: u32,
        lockout_window_ms: u64,
    ) {
        let mut policy = self.policy.write().await;
        policy.session_timeout_ms = session_timeout_ms.max(1);
        policy.max_failed_attempts = max_failed_attempts.max(1);
        policy.lockout_window_ms = lockout_window_ms.max(1);
    }

    pub async fn clear(&self) {
        self.sessions.write().await.clear();
        self.principal_sessions.write().await.clear();
        self.failed_attempts.write().await.clear();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
