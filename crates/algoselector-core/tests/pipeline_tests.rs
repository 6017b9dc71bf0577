//! Integration tests for the dashboard pipeline.
//!
//! These tests drive the stage controllers end to end against a scripted
//! in-memory service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use algoselector_core::{
    ActionOutcome, ActionState, CacheKey, ClientConfig, Dashboard, ErrorKind, PipelineError,
    Prerequisite, PreprocessingAction, ProfilingReport, ReportFormat, Route, RouteDecision,
    RunResult, SessionKey, SessionStore, Stage, StageController, StageStatus,
};
use common::{FakeService, PASSWORD, count, dashboard, fixture, signed_in, until};
use pretty_assertions::assert_eq;

// ============================================================================
// Helper Functions
// ============================================================================

/// Signed in with `passengers.csv` uploaded as `abc123`.
async fn with_dataset(service: &Arc<FakeService>) -> Dashboard {
    let dashboard = signed_in(service);
    let status = dashboard.upload().upload(&fixture("passengers.csv")).await;
    assert!(status.is_ready(), "upload failed: {:?}", status);
    dashboard
}

/// Signed in with `abc123` uploaded and `y` selected as target.
async fn with_target(service: &Arc<FakeService>) -> Dashboard {
    let dashboard = with_dataset(service).await;
    let status = dashboard.preprocessing().select_target("y").await;
    assert!(status.is_ready(), "target selection failed: {:?}", status);
    dashboard
}

// ============================================================================
// Session and Access Tests
// ============================================================================

#[test]
fn test_session_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let store = SessionStore::open(&path);
    store.set(SessionKey::Credential, "tok");
    store.set(SessionKey::DatasetId, "abc123");
    store.set(SessionKey::TargetColumn, "y");
    drop(store);

    let reopened = SessionStore::open(&path);
    assert_eq!(reopened.get(SessionKey::Credential).as_deref(), Some("tok"));
    assert_eq!(reopened.dataset_id().as_deref(), Some("abc123"));
    assert_eq!(reopened.target_column().as_deref(), Some("y"));
}

#[tokio::test]
async fn test_routes_follow_authentication() {
    let service = FakeService::new();
    let dashboard = dashboard(&service, SessionStore::in_memory());

    assert_eq!(
        dashboard.authorize(Route::Dashboard(Stage::Upload)),
        RouteDecision::RedirectToLogin
    );
    assert_eq!(dashboard.authorize(Route::Login), RouteDecision::Allow);

    let err = dashboard.login("user@example.com", "wrong").await.unwrap_err();
    assert_eq!(err, PipelineError::Unauthenticated);
    assert!(dashboard.session().credential().is_none());

    dashboard.login("user@example.com", PASSWORD).await.unwrap();
    assert_eq!(
        dashboard.authorize(Route::Dashboard(Stage::Monitoring)),
        RouteDecision::Allow
    );
    assert_eq!(
        dashboard.authorize(Route::Login),
        RouteDecision::RedirectToDashboard
    );
    assert_eq!(count(&service.calls.login), 2);
}

#[tokio::test]
async fn test_stage_without_credential_needs_login() {
    let service = FakeService::new();
    let dashboard = dashboard(&service, SessionStore::in_memory());

    let status = dashboard.insights().enter().await;
    assert_eq!(status, StageStatus::MissingPrerequisite(Prerequisite::Credential));
    assert!(status.needs_login());
    assert_eq!(count(&service.calls.profile), 0);
}

#[tokio::test]
async fn test_logout_clears_session_and_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let service = FakeService::new();
    let dashboard = dashboard(&service, SessionStore::open(&path));

    dashboard.login("user@example.com", PASSWORD).await.unwrap();
    dashboard.upload().upload(&fixture("passengers.csv")).await;
    dashboard.preprocessing().select_target("y").await;
    assert!(!dashboard.cache().is_empty());

    dashboard.logout();

    assert!(dashboard.session().snapshot().is_empty());
    assert!(dashboard.cache().is_empty());
    assert_eq!(dashboard.preprocessing().status(), StageStatus::Idle);
    assert_eq!(dashboard.current_stage(), None);

    let reopened = SessionStore::open(&path);
    for key in SessionKey::ALL {
        assert_eq!(reopened.get(key), None, "{} survived logout", key.as_str());
    }
}

// ============================================================================
// Upload Tests
// ============================================================================

#[tokio::test]
async fn test_upload_records_dataset() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    let dataset = dashboard.upload().current_dataset().unwrap();
    assert_eq!(dataset.id, "abc123");
    assert_eq!(dataset.row_count, 5);
    assert_eq!(dataset.categorical_columns, vec!["city".to_string()]);
    assert!(dataset.has_column("fare"));
    assert_eq!(dashboard.session().dataset_id().as_deref(), Some("abc123"));
    assert_eq!(dashboard.upload().enter().await.value(), Some(&dataset));
}

#[tokio::test]
async fn test_non_tabular_file_is_never_sent() {
    let service = FakeService::new();
    let dashboard = signed_in(&service);

    let status = dashboard.upload().upload(&fixture("notes.txt")).await;
    match status {
        StageStatus::Error { kind, retryable, .. } => {
            assert_eq!(kind, ErrorKind::ValidationFailure);
            assert!(!retryable);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(count(&service.calls.upload), 0);
    assert_eq!(dashboard.session().dataset_id(), None);
}

#[tokio::test]
async fn test_new_upload_invalidates_previous_dataset() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;
    assert!(dashboard.cache().contains(&CacheKey::profile("abc123", Some("y"))));

    let status = dashboard.upload().upload(&fixture("second.csv")).await;
    assert_eq!(status.value().map(|d| d.id.as_str()), Some("def456"));

    assert!(!dashboard.cache().contains(&CacheKey::profile("abc123", Some("y"))));
    assert!(!dashboard.cache().contains(&CacheKey::dataset("abc123")));
    assert!(dashboard.cache().contains(&CacheKey::dataset("def456")));
    assert_eq!(dashboard.session().dataset_id().as_deref(), Some("def456"));
    assert_eq!(dashboard.session().target_column(), None);
}

// ============================================================================
// Profiling Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_profile_reads_share_one_call() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    let (preprocessing, insights) = tokio::join!(
        dashboard.preprocessing().enter(),
        dashboard.insights().enter()
    );

    assert!(preprocessing.is_ready());
    assert_eq!(preprocessing, insights);
    assert_eq!(count(&service.calls.profile), 1);
}

#[tokio::test]
async fn test_target_change_fetches_new_profile() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    let untargeted = dashboard.preprocessing().enter().await;
    assert!(untargeted.is_ready());
    assert!(dashboard.cache().contains(&CacheKey::profile("abc123", None)));

    let targeted = dashboard.preprocessing().select_target("y").await;
    let report = targeted.value().unwrap();
    assert_eq!(report.meta_features["target"], serde_json::json!("y"));
    assert_eq!(report.meta_feature("class_imbalance_ratio"), Some(1.5));
    assert_eq!(count(&service.calls.profile), 2);

    // Same pair again is served from the cache.
    dashboard.insights().enter().await;
    assert_eq!(count(&service.calls.profile), 2);
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    let status = dashboard.preprocessing().select_target("survived").await;
    assert!(status.is_error());
    assert_eq!(dashboard.session().target_column(), None);
    assert_eq!(count(&service.calls.profile), 0);
}

#[tokio::test]
async fn test_insights_for_unknown_dataset() {
    let service = FakeService::new();
    let session = SessionStore::in_memory();
    session.set(SessionKey::Credential, "tok");
    session.set(SessionKey::DatasetId, "ghost");
    let dashboard = dashboard(&service, session);

    match dashboard.insights().enter().await {
        StageStatus::NotAvailable(message) => {
            assert!(message.contains("Insights are not available"), "{}", message);
        }
        other => panic!("unexpected status {:?}", other),
    }
}

#[tokio::test]
async fn test_response_after_leave_is_dropped() {
    let service = FakeService::new();
    let dashboard = Arc::new(with_dataset(&service).await);
    let gate = service.gate_profiles();

    let entering = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.insights().enter().await })
    };
    until(|| count(&service.calls.profile) == 1).await;
    assert!(dashboard.insights().status().is_loading());

    dashboard.insights().leave();
    gate.notify_one();

    let status = entering.await.unwrap();
    assert_eq!(status, StageStatus::Idle);
    assert_eq!(dashboard.insights().status(), StageStatus::Idle);
}

#[tokio::test]
async fn test_response_for_previous_target_is_dropped() {
    let service = FakeService::new();
    let dashboard = Arc::new(with_dataset(&service).await);
    let gate = service.gate_profiles();

    let untargeted = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.preprocessing().enter().await })
    };
    until(|| count(&service.calls.profile) == 1).await;

    let targeted = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.preprocessing().select_target("y").await })
    };
    until(|| count(&service.calls.profile) == 2).await;
    gate.notify_waiters();

    untargeted.await.unwrap();
    let status = targeted.await.unwrap();
    assert_eq!(status.value().unwrap().meta_features["target"], serde_json::json!("y"));

    let shown = dashboard.preprocessing().status();
    assert_eq!(shown.value().unwrap().meta_features["target"], serde_json::json!("y"));
    let cached = dashboard
        .cache()
        .peek::<ProfilingReport>(&CacheKey::profile("abc123", Some("y")))
        .unwrap();
    assert_eq!(cached.meta_features["target"], serde_json::json!("y"));
}

#[tokio::test]
async fn test_open_leaves_previous_stage() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    assert_eq!(dashboard.open(Stage::Monitoring), RouteDecision::Allow);
    dashboard.monitoring().enter().await;
    assert!(dashboard.monitoring().is_running());

    dashboard.open(Stage::Insights);
    assert_eq!(dashboard.current_stage(), Some(Stage::Insights));
    assert!(!dashboard.monitoring().is_running());
}

// ============================================================================
// Preprocessing Action Tests
// ============================================================================

#[tokio::test]
async fn test_leaving_during_apply_drops_refreshed_profile() {
    let service = FakeService::new();
    let dashboard = Arc::new(with_target(&service).await);
    let gate = service.gate_profiles();

    let applying = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move {
            dashboard
                .preprocessing()
                .apply(PreprocessingAction::Missing)
                .await
        })
    };
    until(|| count(&service.calls.profile) == 2).await;
    assert!(dashboard.preprocessing().status().is_loading());

    dashboard.preprocessing().leave();
    gate.notify_one();

    let outcome = applying.await.unwrap().unwrap();
    assert!(matches!(outcome, ActionOutcome::Applied(_)));
    assert_eq!(dashboard.preprocessing().status(), StageStatus::Idle);
    assert_eq!(
        dashboard.preprocessing().action_state(PreprocessingAction::Missing),
        ActionState::Applied
    );

    // The refreshed profile still landed in the cache.
    let cached = dashboard
        .cache()
        .peek::<ProfilingReport>(&CacheKey::profile("abc123", Some("y")))
        .unwrap();
    assert_eq!(cached.total_missing_values, 0);
}

#[tokio::test]
async fn test_apply_refreshes_profile() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;
    let before = dashboard.preprocessing().status();
    assert_eq!(before.value().unwrap().total_missing_values, 2);

    let outcome = dashboard
        .preprocessing()
        .apply(PreprocessingAction::Missing)
        .await
        .unwrap();

    assert!(matches!(outcome, ActionOutcome::Applied(_)));
    assert_eq!(
        dashboard.preprocessing().action_state(PreprocessingAction::Missing),
        ActionState::Applied
    );
    let after = dashboard.preprocessing().status();
    let report = after.value().unwrap();
    assert_eq!(report.total_missing_values, 0);
    assert!(!report.suggests(PreprocessingAction::Missing));
    assert_eq!(count(&service.calls.profile), 2);
}

#[tokio::test]
async fn test_reapplying_is_a_no_op() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;
    let preprocessing = dashboard.preprocessing();

    preprocessing.apply(PreprocessingAction::Scaling).await.unwrap();
    let again = preprocessing.apply(PreprocessingAction::Scaling).await.unwrap();

    assert_eq!(again, ActionOutcome::AlreadyApplied);
    assert_eq!(count(&service.calls.preprocess), 1);
}

#[tokio::test]
async fn test_concurrent_applies_are_serialized() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;
    let preprocessing = dashboard.preprocessing();

    let (first, second) = tokio::join!(
        preprocessing.apply(PreprocessingAction::Encoding),
        preprocessing.apply(PreprocessingAction::Encoding)
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, ActionOutcome::Applied(_)))
        .count();
    assert_eq!(applied, 1);
    assert!(outcomes.contains(&ActionOutcome::AlreadyApplied));
    assert_eq!(count(&service.calls.preprocess), 1);
}

#[tokio::test]
async fn test_failed_action_can_be_retried() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;
    let preprocessing = dashboard.preprocessing();

    service.fail_preprocess.store(true, std::sync::atomic::Ordering::SeqCst);
    let err = preprocessing.apply(PreprocessingAction::Outliers).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        preprocessing.action_state(PreprocessingAction::Outliers),
        ActionState::Failed(_)
    ));

    service.fail_preprocess.store(false, std::sync::atomic::Ordering::SeqCst);
    preprocessing.apply(PreprocessingAction::Outliers).await.unwrap();
    assert_eq!(
        preprocessing.action_state(PreprocessingAction::Outliers),
        ActionState::Applied
    );
    assert_eq!(count(&service.calls.preprocess), 2);
}

#[tokio::test]
async fn test_apply_without_target_is_rejected() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    let err = dashboard
        .preprocessing()
        .apply(PreprocessingAction::Missing)
        .await
        .unwrap_err();

    assert_eq!(err, PipelineError::MissingPrerequisite(Prerequisite::TargetColumn));
    assert_eq!(count(&service.calls.preprocess), 0);
}

// ============================================================================
// Algorithm Selection Tests
// ============================================================================

#[tokio::test]
async fn test_selection_without_target() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;

    let status = dashboard.selection().enter().await;
    assert_eq!(status, StageStatus::MissingPrerequisite(Prerequisite::TargetColumn));
    let err = dashboard.selection().run(true).await.unwrap_err();
    assert_eq!(err, PipelineError::MissingPrerequisite(Prerequisite::TargetColumn));

    assert_eq!(count(&service.calls.run), 0);
    assert_eq!(count(&service.calls.run_result), 0);
}

#[tokio::test]
async fn test_no_prior_run_is_idle() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;

    assert_eq!(dashboard.selection().enter().await, StageStatus::Idle);
    assert_eq!(count(&service.calls.run_result), 1);
}

#[tokio::test]
async fn test_run_and_reenter_from_cache() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;

    let result = dashboard.selection().run(true).await.unwrap();
    assert_eq!(result.best().map(|a| a.name.as_str()), Some("RandomForest"));
    assert!(!dashboard.selection().is_running());

    let status = dashboard.selection().enter().await;
    assert_eq!(status.value(), Some(&result));
    assert_eq!(count(&service.calls.run_result), 0);

    dashboard.selection().refresh().await;
    assert_eq!(count(&service.calls.run_result), 1);
}

#[tokio::test]
async fn test_empty_run_is_not_retried() {
    let service = FakeService::new();
    service.set_run_outcome(Ok(RunResult::default()));
    let config = ClientConfig::builder()
        .read_retries(3)
        .retry_delay(Duration::ZERO)
        .build()
        .unwrap();
    let session = SessionStore::in_memory();
    session.set(SessionKey::Credential, "tok");
    let dashboard = Dashboard::new(config, service.clone(), Arc::new(session));
    dashboard.upload().upload(&fixture("passengers.csv")).await;
    dashboard.preprocessing().select_target("y").await;

    let err = dashboard.selection().run(false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyResult);
    assert!(matches!(dashboard.selection().status(), StageStatus::Empty(_)));
    assert_eq!(count(&service.calls.run), 1);
}

#[tokio::test]
async fn test_reentering_during_run_shows_loading() {
    let service = FakeService::new();
    let dashboard = Arc::new(with_target(&service).await);
    let gate = service.gate_runs();

    let running = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.selection().run(true).await })
    };
    until(|| count(&service.calls.run) == 1).await;

    dashboard.selection().leave();
    assert_eq!(dashboard.selection().enter().await, StageStatus::Loading);
    assert!(dashboard.selection().status().is_loading());
    assert_eq!(count(&service.calls.run_result), 0);

    gate.notify_one();
    assert!(running.await.unwrap().is_ok());

    // The settled run is read back from the cache.
    let status = dashboard.selection().enter().await;
    assert!(status.is_ready(), "{:?}", status);
    assert_eq!(count(&service.calls.run_result), 0);
}

#[tokio::test]
async fn test_failed_run_stays_retryable() {
    let service = FakeService::new();
    service.set_run_outcome(Err(PipelineError::Network("connection reset".to_string())));
    let dashboard = with_target(&service).await;

    let err = dashboard.selection().run(true).await.unwrap_err();
    assert!(err.is_retryable());
    match dashboard.selection().status() {
        StageStatus::Error { kind, retryable, .. } => {
            assert_eq!(kind, ErrorKind::RemoteFailure);
            assert!(retryable);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert!(!dashboard.selection().is_running());
    assert_eq!(count(&service.calls.run), 1);
}

#[tokio::test]
async fn test_second_trigger_while_running_is_rejected() {
    let service = FakeService::new();
    let dashboard = Arc::new(with_target(&service).await);
    let gate = service.gate_runs();

    let first = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.selection().run(true).await })
    };
    until(|| count(&service.calls.run) == 1).await;
    assert!(dashboard.selection().is_running());

    let err = dashboard.selection().run(true).await.unwrap_err();
    assert_eq!(
        err,
        PipelineError::RunInFlight {
            dataset_id: "abc123".to_string()
        }
    );

    gate.notify_one();
    assert!(first.await.unwrap().is_ok());
    assert!(!dashboard.selection().is_running());
    assert_eq!(count(&service.calls.run), 1);
}

#[tokio::test]
async fn test_recommendation_is_cached() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;

    let status = dashboard.selection().recommend().await;
    assert_eq!(
        status.value().map(|r| r.top_algorithm.as_str()),
        Some("RandomForest")
    );
    dashboard.selection().recommend().await;
    assert_eq!(count(&service.calls.recommend), 1);
    assert_eq!(dashboard.selection().recommendation_status(), status);
}

#[tokio::test]
async fn test_report_download_is_never_cached() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;
    let dir = tempfile::tempdir().unwrap();

    let err = dashboard
        .selection()
        .download_report(ReportFormat::Pdf, dir.path())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    dashboard.selection().run(true).await.unwrap();
    let path = dashboard
        .selection()
        .download_report(ReportFormat::Pdf, dir.path())
        .await
        .unwrap();
    dashboard
        .selection()
        .download_report(ReportFormat::Pdf, dir.path())
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("AlgoSelector_Report_abc123.pdf"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "pdf report for abc123");
    assert_eq!(count(&service.calls.download_report), 3);
}

// ============================================================================
// Explainability Tests
// ============================================================================

#[tokio::test]
async fn test_explanation_follows_run() {
    let service = FakeService::new();
    let dashboard = with_target(&service).await;

    match dashboard.explainability().enter().await {
        StageStatus::NotAvailable(message) => {
            assert!(message.contains("Run algorithm selection"), "{}", message);
        }
        other => panic!("unexpected status {:?}", other),
    }

    dashboard.selection().run(true).await.unwrap();
    let status = dashboard.explainability().enter().await;
    let explanation = status.value().unwrap();
    assert_eq!(explanation.best_algorithm.as_deref(), Some("RandomForest"));
    assert_eq!(explanation.ranked_features()[0].name, "fare");
    // Projected from the cached run, not read again.
    assert_eq!(count(&service.calls.run_result), 1);
}

#[tokio::test]
async fn test_persisted_run_explains_without_target() {
    let service = FakeService::new();
    let dashboard = with_dataset(&service).await;
    service.persist_run("abc123", common::trained_run());

    let status = dashboard.explainability().enter().await;
    assert!(status.is_ready(), "{:?}", status);
}

// ============================================================================
// Monitoring Tests
// ============================================================================

#[tokio::test]
async fn test_monitoring_partial_failure_keeps_other_data() {
    let service = FakeService::new();
    let dashboard = signed_in(&service);
    let monitoring = dashboard.monitoring();

    service.fail_logs.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(monitoring.poll_stats_once().await.is_ok());
    assert!(monitoring.poll_logs_once().await.is_err());

    let snapshot = monitoring.snapshot();
    assert!(snapshot.stats.is_some());
    assert!(snapshot.logs_error.is_some());
    assert!(monitoring.status().is_ready());

    service.fail_stats.store(true, std::sync::atomic::Ordering::SeqCst);
    service.fail_logs.store(false, std::sync::atomic::Ordering::SeqCst);
    monitoring.refresh().await;

    let snapshot = monitoring.snapshot();
    assert_eq!(snapshot.stats.as_ref().map(|s| s.cpu_usage), Some(10.0));
    assert!(snapshot.stats_error.is_some());
    assert_eq!(snapshot.logs.len(), 1);
    assert_eq!(snapshot.logs_error, None);
}

#[tokio::test]
async fn test_monitoring_both_failing_is_an_error() {
    let service = FakeService::new();
    service.fail_stats.store(true, std::sync::atomic::Ordering::SeqCst);
    service.fail_logs.store(true, std::sync::atomic::Ordering::SeqCst);
    let dashboard = signed_in(&service);

    let status = dashboard.monitoring().refresh().await;
    assert!(status.is_error(), "{:?}", status);
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_polls_on_intervals() {
    let service = FakeService::new();
    let dashboard = signed_in(&service);

    let status = dashboard.monitoring().enter().await;
    assert!(status.is_ready());
    assert!(dashboard.monitoring().is_running());

    // Stats every 3s and logs every 5s, after the initial poll of each.
    tokio::time::sleep(Duration::from_millis(9_500)).await;
    assert_eq!(count(&service.calls.system_stats), 4);
    assert_eq!(count(&service.calls.system_logs), 2);

    let snapshot = dashboard.monitoring().snapshot();
    assert_eq!(snapshot.history.len(), 3);
    assert_eq!(snapshot.history.latest().map(|s| s.cpu_usage), Some(13.0));
}

#[tokio::test(start_paused = true)]
async fn test_logout_stops_monitoring() {
    let service = FakeService::new();
    let dashboard = signed_in(&service);
    dashboard.monitoring().enter().await;

    dashboard.logout();
    assert!(!dashboard.monitoring().is_running());
    assert!(!dashboard.monitoring().snapshot().has_data());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(count(&service.calls.system_stats), 1);
    assert_eq!(count(&service.calls.system_logs), 1);
}

#[tokio::test]
async fn test_logout_drops_pending_monitoring_poll() {
    let service = FakeService::new();
    let dashboard = Arc::new(signed_in(&service));
    let gate = service.gate_stats();

    let entering = {
        let dashboard = Arc::clone(&dashboard);
        tokio::spawn(async move { dashboard.monitoring().enter().await })
    };
    until(|| count(&service.calls.system_stats) == 1).await;

    dashboard.logout();
    gate.notify_one();
    entering.await.unwrap();

    let snapshot = dashboard.monitoring().snapshot();
    assert!(snapshot.stats.is_none());
    assert!(snapshot.history.is_empty());
    assert!(snapshot.logs.is_empty());
    assert!(!dashboard.monitoring().is_running());
}
