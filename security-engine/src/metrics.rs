//! Aggregate security metrics and derived status
//!
//! Every processed event lands here: aggregate counters, time-of-day
//! histograms, and a bounded event history. `generate_status` derives the
//! overall posture (risk score, threat level, trend, recommendations) on
//! demand; nothing derived is persisted.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use common::constants::metrics as metrics_defaults;
use common::{clamp_unit, SecurityEvent, SecurityEventKind, SecuritySeverity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Aggregate counters over all processed events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub total_events: u64,
    pub events_by_kind: HashMap<String, u64>,
    pub events_by_severity: HashMap<String, u64>,
    pub hourly_counts: [u64; 24],
    pub weekday_counts: [u64; 7],
    pub blocked_events: u64,
    pub flagged_events: u64,
    pub response_time_total_ms: f64,
    pub response_time_samples: u64,
}

impl SecurityMetrics {
    pub fn average_response_time_ms(&self) -> f64 {
        if self.response_time_samples == 0 {
            return 0.0;
        }
        self.response_time_total_ms / self.response_time_samples as f64
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Secure,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Point-in-time posture snapshot, recomputed on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStatus {
    pub overall: ThreatLevel,
    pub risk_score: f64,
    pub active_threats: u64,
    pub recent_anomalies: u64,
    pub enclave_health: f64,
    pub trend: Trend,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
}

struct MetricsState {
    metrics: SecurityMetrics,
    history: VecDeque<SecurityEvent>,
    capacity: usize,
}

/// Accumulates processed events and answers status queries
pub struct MetricsReporter {
    state: RwLock<MetricsState>,
}

fn severity_weight(severity: &str) -> f64 {
    match severity {
        "critical" => 1.0,
        "high" => 0.6,
        "medium" => 0.3,
        "low" => 0.1,
        _ => 0.0,
    }
}

/// Events-per-second over the most recent `sample` history entries compared
/// against the preceding `sample`. Rising volume reads as a declining
/// posture. With fewer than two full buckets there is nothing to compare.
fn compute_trend(history: &VecDeque<SecurityEvent>, sample: usize) -> Trend {
    let len = history.len();
    if len < sample * 2 {
        return Trend::Stable;
    }

    let rate = |slice: &[&SecurityEvent]| -> Option<f64> {
        let first = slice.first()?.timestamp;
        let last = slice.last()?.timestamp;
        let span_ms = (last - first).num_milliseconds().max(1) as f64;
        Some(slice.len() as f64 / span_ms)
    };

    let entries: Vec<&SecurityEvent> = history.iter().collect();
    let previous = &entries[len - sample * 2..len - sample];
    let recent = &entries[len - sample..];

    match (rate(previous), rate(recent)) {
        (Some(previous_rate), Some(recent_rate)) if previous_rate > 0.0 => {
            let shift = recent_rate / previous_rate - 1.0;
            if shift > metrics_defaults::TREND_SHIFT_BAND {
                Trend::Declining
            } else if shift < -metrics_defaults::TREND_SHIFT_BAND {
                Trend::Improving
            } else {
                Trend::Stable
            }
        }
        _ => Trend::Stable,
    }
}

fn recommendations_for(
    risk_score: f64,
    trend: Trend,
    recent_high: u64,
    avg_response_ms: f64,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if risk_score > 0.7 {
        recommendations.push(
            "Critical risk level: audit recent high-severity events and rotate exposed credentials"
                .to_string(),
        );
    } else if risk_score > 0.4 {
        recommendations.push(
            "Elevated risk: tighten monitoring and review recent authentication activity"
                .to_string(),
        );
    }
    if trend == Trend::Declining {
        recommendations.push(
            "Security event volume is rising; investigate the dominant event sources".to_string(),
        );
    }
    if recent_high > 10 {
        recommendations.push(
            "High-severity events are clustering; review the affected principals".to_string(),
        );
    }
    if avg_response_ms > 1000.0 {
        recommendations.push(
            "Event processing latency is elevated; check persistence hooks and host load"
                .to_string(),
        );
    }
    if recommendations.is_empty() {
        recommendations
            .push("Security posture is healthy; keep the current monitoring cadence".to_string());
    }

    recommendations
}

impl MetricsReporter {
    pub fn new() -> Self {
        Self::with_capacity(metrics_defaults::MAX_EVENT_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(MetricsState {
                metrics: SecurityMetrics::default(),
                history: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Fold an event into the aggregates and the bounded history
    pub async fn record_event(&self, event: &SecurityEvent) {
        let mut state = self.state.write().await;

        state.metrics.total_events += 1;
        *state
            .metrics
            .events_by_kind
            .entry(event.kind.as_str().to_string())
            .or_insert(0) += 1;
        *state
            .metrics
            .events_by_severity
            .entry(event.severity.as_str().to_string())
            .or_insert(0) += 1;
        state.metrics.hourly_counts[event.timestamp.hour() as usize] += 1;
        state.metrics.weekday_counts
            [event.timestamp.weekday().num_days_from_monday() as usize] += 1;
        match event.action {
            Some(common::SecurityAction::Blocked) => state.metrics.blocked_events += 1,
            Some(common::SecurityAction::Flagged) => state.metrics.flagged_events += 1,
            _ => {}
        }

        state.history.push_back(event.clone());
        while state.history.len() > state.capacity {
            state.history.pop_front();
        }
    }

    /// Accumulate the orchestrator's per-event processing time
    pub async fn record_response_time(&self, elapsed_ms: f64) {
        let mut state = self.state.write().await;
        state.metrics.response_time_total_ms += elapsed_ms;
        state.metrics.response_time_samples += 1;
    }

    /// Derive the current posture. `enclave_health` is supplied by the caller
    /// since hardware state lives outside this component.
    pub async fn generate_status(&self, enclave_health: f64) -> SecurityStatus {
        let state = self.state.read().await;
        let metrics = &state.metrics;

        let risk_score = if metrics.total_events == 0 {
            0.0
        } else {
            let total = metrics.total_events as f64;
            clamp_unit(
                metrics
                    .events_by_severity
                    .iter()
                    .map(|(severity, count)| severity_weight(severity) * (*count as f64 / total))
                    .sum(),
            )
        };

        let overall = if risk_score > 0.7 {
            ThreatLevel::Critical
        } else if risk_score > 0.4 {
            ThreatLevel::Warning
        } else {
            ThreatLevel::Secure
        };

        let hour_ago = Utc::now() - Duration::hours(1);
        let active_threats = state
            .history
            .iter()
            .filter(|e| e.timestamp >= hour_ago && e.severity >= SecuritySeverity::High)
            .count() as u64;
        let recent_anomalies = state
            .history
            .iter()
            .filter(|e| {
                e.timestamp >= hour_ago
                    && (e.kind == SecurityEventKind::Behavioral
                        || e.tags.iter().any(|t| t.starts_with("anomaly")))
            })
            .count() as u64;

        let trend = compute_trend(&state.history, metrics_defaults::TREND_SAMPLE_SIZE);

        SecurityStatus {
            overall,
            risk_score,
            active_threats,
            recent_anomalies,
            enclave_health: clamp_unit(enclave_health),
            trend,
            recommendations: recommendations_for(
                risk_score,
                trend,
                active_threats,
                metrics.average_response_time_ms(),
            ),
            generated_at: Utc::now(),
            last_event_at: state.history.back().map(|e| e.timestamp),
        }
    }

    /// Lossless snapshot of the aggregate counters
    pub async fn snapshot(&self) -> SecurityMetrics {
        self.state.read().await.metrics.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    pub async fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.write().await;
        state.capacity = capacity.max(1);
        while state.history.len() > state.capacity {
            state.history.pop_front();
        }
    }

    /// Bulk reset; individual counters are never deleted piecemeal
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.metrics = SecurityMetrics::default();
        state.history.clear();
    }
}

impl Default for MetricsReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SecurityEvent, SecurityEventKind, SecuritySeverity};

    fn event(kind: SecurityEventKind, severity: SecuritySeverity) -> SecurityEvent {
        SecurityEvent::new(kind, severity)
    }

    #[tokio::test]
    async fn counters_track_kind_and_severity() {
        let reporter = MetricsReporter::new();
        reporter
            .record_event(&event(
                SecurityEventKind::Authentication,
                SecuritySeverity::Low,
            ))
            .await;
        reporter
            .record_event(&event(SecurityEventKind::Network, SecuritySeverity::High))
            .await;

        let metrics = reporter.snapshot().await;
        assert_eq!(metrics.total_events, 2);
        assert_eq!(metrics.events_by_kind.get("authentication"), Some(&1));
        assert_eq!(metrics.events_by_kind.get("network"), Some(&1));
        assert_eq!(metrics.events_by_severity.get("high"), Some(&1));
    }

    #[tokio::test]
    async fn critical_heavy_stream_reports_critical_status() {
        let reporter = MetricsReporter::new();
        for _ in 0..8 {
            reporter
                .record_event(&event(
                    SecurityEventKind::Network,
                    SecuritySeverity::Critical,
                ))
                .await;
        }
        for _ in 0..2 {
            reporter
                .record_event(&event(SecurityEventKind::System, SecuritySeverity::Low))
                .await;
        }

        let status = reporter.generate_status(1.0).await;
        // 0.8 * 1.0 + 0.2 * 0.1 = 0.82
        assert!(status.risk_score > 0.7);
        assert_eq!(status.overall, ThreatLevel::Critical);
        assert!(!status.recommendations.is_empty());
    }

    #[tokio::test]
    async fn low_severity_stream_is_secure() {
        let reporter = MetricsReporter::new();
        for _ in 0..10 {
            reporter
                .record_event(&event(SecurityEventKind::System, SecuritySeverity::Low))
                .await;
        }

        let status = reporter.generate_status(1.0).await;
        assert_eq!(status.overall, ThreatLevel::Secure);
        assert!((status.risk_score - 0.1).abs() < 1e-9);
        assert_eq!(
            status.recommendations,
            vec!["Security posture is healthy; keep the current monitoring cadence".to_string()]
        );
    }

    #[tokio::test]
    async fn high_severity_stream_is_warning() {
        let reporter = MetricsReporter::new();
        for _ in 0..10 {
            reporter
                .record_event(&event(SecurityEventKind::Network, SecuritySeverity::High))
                .await;
        }

        let status = reporter.generate_status(1.0).await;
        assert_eq!(status.overall, ThreatLevel::Warning);
        assert!((status.risk_score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn history_is_bounded_and_evicts_oldest_first() {
        let reporter = MetricsReporter::with_capacity(5);
        for _ in 0..12 {
            reporter
                .record_event(&event(SecurityEventKind::System, SecuritySeverity::Low))
                .await;
        }

        assert_eq!(reporter.history_len().await, 5);
        // Counters are unaffected by history eviction.
        assert_eq!(reporter.snapshot().await.total_events, 12);
    }

    #[tokio::test]
    async fn accelerating_event_volume_reads_as_declining() {
        let reporter = MetricsReporter::new();
        let start = Utc::now() - Duration::minutes(30);

        // Preceding bucket: one event every 10s. Recent bucket: every 100ms.
        for i in 0..100i64 {
            let mut e = event(SecurityEventKind::Network, SecuritySeverity::Low);
            e.timestamp = start + Duration::seconds(i * 10);
            reporter.record_event(&e).await;
        }
        let recent_start = start + Duration::seconds(1000);
        for i in 0..100i64 {
            let mut e = event(SecurityEventKind::Network, SecuritySeverity::Low);
            e.timestamp = recent_start + Duration::milliseconds(i * 100);
            reporter.record_event(&e).await;
        }

        let status = reporter.generate_status(1.0).await;
        assert_eq!(status.trend, Trend::Declining);
    }

    #[tokio::test]
    async fn slowing_event_volume_reads_as_improving() {
        let reporter = MetricsReporter::new();
        let start = Utc::now() - Duration::minutes(30);

        for i in 0..100i64 {
            let mut e = event(SecurityEventKind::Network, SecuritySeverity::Low);
            e.timestamp = start + Duration::milliseconds(i * 100);
            reporter.record_event(&e).await;
        }
        let recent_start = start + Duration::seconds(10);
        for i in 0..100i64 {
            let mut e = event(SecurityEventKind::Network, SecuritySeverity::Low);
            e.timestamp = recent_start + Duration::seconds(i * 10);
            reporter.record_event(&e).await;
        }

        let status = reporter.generate_status(1.0).await;
        assert_eq!(status.trend, Trend::Improving);
    }

    #[tokio::test]
    async fn short_history_trend_is_stable() {
        let reporter = MetricsReporter::new();
        for _ in 0..50 {
            reporter
                .record_event(&event(SecurityEventKind::System, SecuritySeverity::Low))
                .await;
        }
        assert_eq!(reporter.generate_status(1.0).await.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn reset_clears_counters_and_history() {
        let reporter = MetricsReporter::new();
        reporter
            .record_event(&event(SecurityEventKind::System, SecuritySeverity::Low))
            .await;
        reporter.reset().await;

        assert_eq!(reporter.snapshot().await.total_events, 0);
        assert_eq!(reporter.history_len().await, 0);
    }
}
