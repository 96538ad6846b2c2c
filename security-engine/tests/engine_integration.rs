//! End-to-end tests exercising the engine through `SecurityManager`

use security_engine::{
    EngineConfig, RateLimiter, SecurityEvent, SecurityEventKind, SecurityManager,
    SecuritySeverity, SessionError, ThreatLevel,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

fn event(kind: SecurityEventKind, severity: SecuritySeverity) -> SecurityEvent {
    SecurityEvent::new(kind, severity)
}

#[tokio::test]
async fn all_scores_stay_in_unit_interval() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    for i in 0..30 {
        let severity = match i % 4 {
            0 => SecuritySeverity::Low,
            1 => SecuritySeverity::Medium,
            2 => SecuritySeverity::High,
            _ => SecuritySeverity::Critical,
        };
        let e = event(SecurityEventKind::DataAccess, severity)
            .with_principal("alice")
            .with_detail("path", format!("/records/{i}"));
        let status = manager.process_security_event(e).await.unwrap();

        assert!((0.0..=1.0).contains(&status.risk_score));
        assert!((0.0..=1.0).contains(&status.enclave_health));
    }

    let profile = manager.get_behavioral_profile("alice").await.unwrap();
    assert!((0.0..=1.0).contains(&profile.risk_score));
    assert!((0.0..=1.0).contains(&profile.confidence));

    let report = manager.detect_behavioral_anomalies("alice").await.unwrap();
    assert!((0.0..=1.0).contains(&report.confidence));

    for enclave in manager.export_security_data().await.enclaves {
        assert!((0.0..=1.0).contains(&enclave.health_score));
    }
}

#[tokio::test]
async fn principal_locks_exactly_at_threshold_and_reset_unlocks() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    for _ in 0..4 {
        let status = manager
            .record_failed_attempt("bob", HashMap::new())
            .await;
        assert!(!status.is_locked);
        assert!(!manager.is_user_locked("bob").await);
    }

    let status = manager.record_failed_attempt("bob", HashMap::new()).await;
    assert!(status.is_locked);
    assert_eq!(status.remaining_attempts, 0);
    assert!(status.lockout_end.is_some());
    assert!(manager.is_user_locked("bob").await);

    manager.reset_failed_attempts("bob").await;
    assert!(!manager.is_user_locked("bob").await);
}

#[tokio::test]
async fn lockout_threshold_is_runtime_configurable() {
    let manager = SecurityManager::with_defaults().await.unwrap();
    let config = EngineConfig {
        max_failed_attempts: 2,
        ..Default::default()
    };
    manager.update_config(config).await.unwrap();

    manager.record_failed_attempt("carol", HashMap::new()).await;
    assert!(!manager.is_user_locked("carol").await);
    manager.record_failed_attempt("carol", HashMap::new()).await;
    assert!(manager.is_user_locked("carol").await);
}

#[tokio::test]
async fn expired_session_reports_expired_then_inactive() {
    let config = EngineConfig {
        session_timeout_ms: 40,
        ..Default::default()
    };
    let manager = SecurityManager::new(config).await.unwrap();

    let session = manager
        .create_session("dan", HashMap::new())
        .await
        .unwrap();
    assert!(session.is_active);

    sleep(Duration::from_millis(90)).await;

    assert_eq!(
        manager.validate_session(&session.id).await,
        Err(SessionError::Expired)
    );
    // The session stays in history, flagged inactive.
    let stored = manager.get_session(&session.id).await.unwrap();
    assert!(!stored.is_active);
}

#[tokio::test]
async fn sixth_request_is_denied_and_window_reset_readmits() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    for _ in 0..5 {
        assert!(manager.check_limit("gateway:eve", 5, 1000).unwrap());
    }
    assert!(!manager.check_limit("gateway:eve", 5, 1000).unwrap());

    let info = manager.rate_limit_info("gateway:eve").unwrap();
    assert!(info.blocked);
    assert_eq!(info.limit, 5);

    // Timing semantics with a short block, against the limiter directly.
    let limiter = RateLimiter::new();
    let block = Duration::from_millis(60);
    for _ in 0..5 {
        assert!(limiter
            .check_limit_with_block("k", 5, 60, block)
            .unwrap());
    }
    assert!(!limiter.check_limit_with_block("k", 5, 60, block).unwrap());

    sleep(Duration::from_millis(150)).await;

    assert!(limiter.check_limit_with_block("k", 5, 60, block).unwrap());
    let info = limiter.get_info("k").unwrap();
    assert_eq!(info.current_count, 1);
}

#[tokio::test]
async fn certificate_pinning_is_opt_in_allow_listing() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    assert!(manager.verify_certificate("unpinned.example", "anything").await);

    manager
        .pin_certificate(
            "api.example",
            vec!["AA:11".to_string(), "BB:22".to_string()],
        )
        .await;
    assert!(manager.verify_certificate("api.example", "aa11").await);
    assert!(manager.verify_certificate("api.example", "bb22").await);
    assert!(!manager.verify_certificate("api.example", "cc33").await);

    assert!(manager.unpin_certificate("api.example").await);
    assert!(manager.verify_certificate("api.example", "cc33").await);
}

#[tokio::test]
async fn high_severity_clustering_yields_anomaly_with_details() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    for i in 0..8 {
        let e = event(SecurityEventKind::DataAccess, SecuritySeverity::High)
            .with_principal("frank")
            .with_detail("record", format!("r{i}"));
        manager.process_security_event(e).await.unwrap();
    }
    let e = event(SecurityEventKind::Network, SecuritySeverity::Low).with_principal("frank");
    manager.process_security_event(e).await.unwrap();
    let e = event(SecurityEventKind::System, SecuritySeverity::Low).with_principal("frank");
    manager.process_security_event(e).await.unwrap();

    let report = manager.detect_behavioral_anomalies("frank").await.unwrap();
    assert!(report.is_anomaly);
    assert!(report
        .details
        .iter()
        .any(|d| d.contains("high-severity clustering")));
}

#[tokio::test]
async fn critical_heavy_stream_drives_status_critical() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    for _ in 0..8 {
        manager
            .process_security_event(event(
                SecurityEventKind::Network,
                SecuritySeverity::Critical,
            ))
            .await
            .unwrap();
    }
    let mut status = manager.current_status().await;
    for _ in 0..2 {
        status = manager
            .process_security_event(event(SecurityEventKind::System, SecuritySeverity::Low))
            .await
            .unwrap();
    }

    assert!(status.risk_score > 0.7);
    assert_eq!(status.overall, ThreatLevel::Critical);
    assert!(status.active_threats >= 8);
    assert!(!status.recommendations.is_empty());
}

#[tokio::test]
async fn threat_payloads_flow_through_the_full_pipeline() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    let e = event(SecurityEventKind::DataAccess, SecuritySeverity::Low)
        .with_principal("mallory")
        .with_detail("query", "name='x' UNION SELECT * FROM credentials");
    let status = manager.process_security_event(e).await.unwrap();
    assert!((0.0..=1.0).contains(&status.risk_score));

    // The behavioral update ran despite the threat match: no step is skipped.
    let profile = manager.get_behavioral_profile("mallory").await.unwrap();
    assert_eq!(profile.event_type_counts.get("data_access"), Some(&1));
    assert_eq!(profile.learning_window.len(), 1);
}

#[tokio::test]
async fn export_round_trips_losslessly() {
    let manager = SecurityManager::with_defaults().await.unwrap();

    for i in 0..6 {
        let kind = if i % 2 == 0 {
            SecurityEventKind::Authentication
        } else {
            SecurityEventKind::DataAccess
        };
        let e = event(kind, SecuritySeverity::Medium).with_principal("grace");
        manager.process_security_event(e).await.unwrap();
    }
    manager
        .create_session("grace", HashMap::new())
        .await
        .unwrap();
    manager
        .pin_certificate("pinned.example", vec!["0123".to_string()])
        .await;

    let export = manager.export_security_data().await;
    let json = manager.export_security_json().await.unwrap();
    let restored: security_engine::SecurityExport = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.metrics.total_events, export.metrics.total_events);
    assert_eq!(restored.metrics.events_by_kind, export.metrics.events_by_kind);
    assert_eq!(
        restored.metrics.events_by_severity,
        export.metrics.events_by_severity
    );
    assert_eq!(restored.profiles.len(), export.profiles.len());
    assert_eq!(restored.sessions.len(), export.sessions.len());
    assert_eq!(restored.enclaves.len(), export.enclaves.len());
    assert_eq!(restored.pinned_domains, export.pinned_domains);
}

#[tokio::test]
async fn maintenance_sweep_is_idempotent() {
    let config = EngineConfig {
        session_timeout_ms: 40,
        ..Default::default()
    };
    let manager = SecurityManager::new(config).await.unwrap();

    manager.create_session("ivy", HashMap::new()).await.unwrap();
    manager.create_session("ivy", HashMap::new()).await.unwrap();

    sleep(Duration::from_millis(90)).await;

    let first = manager.maintenance_sweep().await;
    assert_eq!(first.expired_sessions, 2);

    let second = manager.maintenance_sweep().await;
    assert_eq!(second.expired_sessions, 0);

    // Same active/inactive partition both times.
    let sessions = manager.export_security_data().await.sessions;
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| !s.is_active));
}

#[tokio::test]
async fn concurrent_failed_attempts_are_all_counted() {
    let manager = std::sync::Arc::new(SecurityManager::with_defaults().await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..5 {
        let manager = std::sync::Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager.record_failed_attempt("hank", HashMap::new()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Five concurrent attempts: none lost to a race, so the principal locks.
    assert!(manager.is_user_locked("hank").await);
}
