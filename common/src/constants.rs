//! Centralized constants for the security-engine workspace
//!
//! This module contains all shared default tunables so that services built on
//! the engine stay consistent and configuration drift is avoided.

/// Security policy constants
pub mod security {
    /// Default session time-to-live in milliseconds (1 hour)
    pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 3_600_000;

    /// Maximum number of failed attempts before a principal is locked out
    pub const MAX_FAILED_ATTEMPTS: u32 = 5;

    /// Lockout window in milliseconds (5 minutes)
    pub const LOCKOUT_WINDOW_MS: u64 = 300_000;

    /// Smoothed-risk level above which a profile counts as anomalous
    pub const ANOMALY_THRESHOLD: f64 = 0.8;

    /// Exponential-smoothing factor for per-principal risk blending
    pub const LEARNING_RATE: f64 = 0.1;

    /// Aggregate pattern-match score above which a payload is a threat
    pub const THREAT_SCORE_THRESHOLD: f64 = 0.7;

    /// Health score below which an enclave transitions to compromised
    pub const ENCLAVE_HEALTH_THRESHOLD: f64 = 0.9;

    /// Maximum retained event summaries per behavioral profile
    pub const LEARNING_WINDOW_CAP: usize = 1000;
}

/// Metrics and reporting constants
pub mod metrics {
    /// Maximum retained events in the metrics history ring buffer
    pub const MAX_EVENT_HISTORY: usize = 10_000;

    /// Sample size per bucket when computing the event-volume trend
    pub const TREND_SAMPLE_SIZE: usize = 100;

    /// Relative change in event volume that flips the trend away from stable
    pub const TREND_SHIFT_BAND: f64 = 0.2;

    /// Default status reporting interval in milliseconds
    pub const REPORTING_INTERVAL_MS: u64 = 60_000;
}

/// Rate limiting defaults, one quota per operation class
pub mod rate_limiting {
    /// How long a key stays blocked after exceeding its quota (5 minutes)
    pub const DEFAULT_BLOCK_DURATION_MS: u64 = 300_000;

    /// Authentication attempts per principal: 5 per minute
    pub const AUTHENTICATION: (u32, u64) = (5, 60_000);

    /// Identity creation: 3 per hour
    pub const IDENTITY_CREATION: (u32, u64) = (3, 3_600_000);

    /// Identity resolution lookups: 100 per minute
    pub const RESOLUTION: (u32, u64) = (100, 60_000);

    /// Generic API calls: 60 per minute
    pub const API: (u32, u64) = (60, 60_000);

    /// Interactive user actions: 30 per minute
    pub const USER_ACTION: (u32, u64) = (30, 60_000);

    /// File uploads: 10 per five minutes
    pub const FILE_UPLOAD: (u32, u64) = (10, 300_000);

    /// Account recovery flows: 3 per hour
    pub const RECOVERY: (u32, u64) = (3, 3_600_000);
}
