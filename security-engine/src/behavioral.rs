//! Behavioral baselines and anomaly detection
//!
//! One evolving profile per principal: hourly/daily activity histograms,
//! per-event-type and per-location counts, and a bounded window of recent
//! event summaries. Each event folds a risk delta into the profile's running
//! score by exponential smoothing; anomaly detection re-evaluates the same
//! signals on demand and reports a confidence with human-readable details.

use chrono::{DateTime, Datelike, Timelike, Utc};
use common::constants::security;
use common::{clamp_unit, EngineError, SecurityEvent, SecurityEventKind, SecuritySeverity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Trimmed copy of an event retained in the learning window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub kind: SecurityEventKind,
    pub severity: SecuritySeverity,
    pub timestamp: DateTime<Utc>,
    pub risk_score: f64,
}

/// Per-principal behavioral baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralProfile {
    pub principal_id: String,
    pub hourly_counts: [u64; 24],
    pub daily_counts: [u64; 7],
    pub event_type_counts: HashMap<String, u64>,
    pub location_counts: HashMap<String, u64>,
    pub risk_score: f64,
    pub anomaly_count: u64,
    pub confidence: f64,
    pub learning_window: VecDeque<EventSummary>,
    pub last_activity: DateTime<Utc>,
}

impl BehavioralProfile {
    fn new(principal_id: String) -> Self {
        Self {
            principal_id,
            hourly_counts: [0; 24],
            daily_counts: [0; 7],
            event_type_counts: HashMap::new(),
            location_counts: HashMap::new(),
            risk_score: 0.0,
            anomaly_count: 0,
            confidence: 0.0,
            learning_window: VecDeque::new(),
            last_activity: Utc::now(),
        }
    }
}

/// Result of an anomaly check against a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub is_anomaly: bool,
    pub confidence: f64,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Tuning {
    anomaly_threshold: f64,
    learning_rate: f64,
    window_cap: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            anomaly_threshold: security::ANOMALY_THRESHOLD,
            learning_rate: security::LEARNING_RATE,
            window_cap: security::LEARNING_WINDOW_CAP,
        }
    }
}

/// Maintains behavioral baselines for every observed principal
pub struct BehavioralAnalyzer {
    profiles: RwLock<HashMap<String, BehavioralProfile>>,
    tuning: RwLock<Tuning>,
}

/// The risk signals, evaluated against current profile state. Used both when
/// folding an event into the smoothed score and when answering an anomaly
/// query, so the two views cannot drift apart.
fn risk_signals(profile: &BehavioralProfile, hour: usize) -> (f64, Vec<String>) {
    let mut delta = 0.0;
    let mut details = Vec::new();

    let total: u64 = profile.hourly_counts.iter().sum();
    if total > 0 {
        let hourly_avg = total as f64 / 24.0;
        let current = profile.hourly_counts[hour] as f64;
        if current > hourly_avg * 3.0 {
            delta += 0.3;
            details.push(format!(
                "activity spike: {current:.0} events this hour against an hourly average of {hourly_avg:.2}"
            ));
        }
    }

    if !profile.event_type_counts.is_empty() {
        let type_total: u64 = profile.event_type_counts.values().sum();
        let type_avg = type_total as f64 / profile.event_type_counts.len() as f64;
        for (kind, count) in &profile.event_type_counts {
            if *count as f64 > type_avg * 2.0 {
                delta += 0.2;
                details.push(format!(
                    "unusual concentration of {kind} events ({count} against a per-type average of {type_avg:.2})"
                ));
            }
        }
    }

    let recent_high = profile
        .learning_window
        .iter()
        .rev()
        .take(10)
        .filter(|summary| summary.severity >= SecuritySeverity::High)
        .count();
    if recent_high > 3 {
        delta += 0.4;
        details.push(format!(
            "high-severity clustering: {recent_high} of the last 10 events"
        ));
    }

    (delta, details)
}

impl BehavioralAnalyzer {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            tuning: RwLock::new(Tuning::default()),
        }
    }

    /// Fold an event into the principal's profile. Creates the profile on
    /// first sight of the principal.
    pub async fn update_profile(&self, principal_id: &str, event: &SecurityEvent) {
        let tuning = *self.tuning.read().await;
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(principal_id.to_string())
            .or_insert_with(|| BehavioralProfile::new(principal_id.to_string()));

        let hour = event.timestamp.hour() as usize;
        let weekday = event.timestamp.weekday().num_days_from_monday() as usize;

        profile.hourly_counts[hour] += 1;
        profile.daily_counts[weekday] += 1;
        *profile
            .event_type_counts
            .entry(event.kind.as_str().to_string())
            .or_insert(0) += 1;
        if let Some(location) = event.details.get("location") {
            *profile
                .location_counts
                .entry(location.clone())
                .or_insert(0) += 1;
        }

        profile.learning_window.push_back(EventSummary {
            kind: event.kind,
            severity: event.severity,
            timestamp: event.timestamp,
            risk_score: event.risk_score,
        });
        while profile.learning_window.len() > tuning.window_cap {
            profile.learning_window.pop_front();
        }

        let (delta, _) = risk_signals(profile, hour);
        profile.risk_score = clamp_unit(
            profile.risk_score * (1.0 - tuning.learning_rate) + delta * tuning.learning_rate,
        );
        profile.confidence = clamp_unit(delta);
        if profile.risk_score > tuning.anomaly_threshold {
            profile.anomaly_count += 1;
            tracing::warn!(
                principal_id = %principal_id,
                risk_score = profile.risk_score,
                anomaly_count = profile.anomaly_count,
                "Behavioral risk above anomaly threshold"
            );
        }
        profile.last_activity = Utc::now();
    }

    /// Evaluate the principal's current profile for anomalous behavior
    pub async fn detect_anomalies(&self, principal_id: &str) -> Result<AnomalyReport, EngineError> {
        let tuning = *self.tuning.read().await;
        let profiles = self.profiles.read().await;
        let profile = profiles
            .get(principal_id)
            .ok_or_else(|| EngineError::NotFound {
                resource: format!("behavioral profile for {principal_id}"),
            })?;

        let hour = Utc::now().hour() as usize;
        let (mut confidence, mut details) = risk_signals(profile, hour);

        if profile.risk_score > tuning.anomaly_threshold {
            confidence += 0.3;
            details.push(format!(
                "smoothed risk score {:.2} exceeds the anomaly threshold {:.2}",
                profile.risk_score, tuning.anomaly_threshold
            ));
        }

        let confidence = clamp_unit(confidence);
        Ok(AnomalyReport {
            is_anomaly: confidence > tuning.anomaly_threshold,
            confidence,
            details,
        })
    }

    pub async fn get_profile(&self, principal_id: &str) -> Option<BehavioralProfile> {
        self.profiles.read().await.get(principal_id).cloned()
    }

    /// Profiles are never evicted automatically; this is the only removal path
    pub async fn remove_profile(&self, principal_id: &str) -> bool {
        self.profiles.write().await.remove(principal_id).is_some()
    }

    pub async fn profile_count(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn export_profiles(&self) -> Vec<BehavioralProfile> {
        let mut profiles: Vec<BehavioralProfile> =
            self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| a.principal_id.cmp(&b.principal_id));
        profiles
    }

    pub async fn set_tuning(&self, anomaly_threshold: f64, learning_rate: f64, window_cap: usize) {
        let mut tuning = self.tuning.write().await;
        tuning.anomaly_threshold = clamp_unit(anomaly_threshold);
        tuning.learning_rate = learning_rate.clamp(f64::EPSILON, 1.0);
        tuning.window_cap = window_cap.max(1);
    }

    pub async fn clear(&self) {
        self.profiles.write().await.clear();
    }
}

impl Default for BehavioralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
