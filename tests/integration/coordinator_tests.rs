//! Activation coordinator integration tests

mod support;

use envswitch::coordinator::spawn_runtime_monitor;
use envswitch::core::error::CoordinatorError;
use envswitch::core::events::NotificationLevel;
use envswitch_protocol::{ActivationStatus, RuntimeStatus, ServiceKind, ServicePatch};
use std::time::Duration;
use support::{settings, FakeBackend, Harness};
use tokio_test::assert_ok;

use ActivationStatus::{Active, Inactive};

fn status(h: &Harness, id: &str) -> Option<ActivationStatus> {
    h.coordinator.state().environment(id).map(|e| e.status)
}

#[tokio::test]
async fn test_second_service_of_same_kind_is_refused_without_gateway_call() {
    let h = Harness::start(FakeBackend::new(), settings(true, false, &[])).await;

    let dev = assert_ok!(h.coordinator.create_environment("Dev").await);
    assert_eq!(dev.status, Inactive);
    assert_ok!(h.coordinator.select_environment(&dev.id).await);

    assert_ok!(
        h.coordinator
            .create_service(&dev.id, ServiceKind::Nginx, "1.25")
            .await
    );
    let err = h
        .coordinator
        .create_service(&dev.id, ServiceKind::Nginx, "1.27")
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::Conflict { kind: ServiceKind::Nginx }));
    assert_eq!(h.backend.count("createService"), 1);
    let nginx = h
        .coordinator
        .state()
        .services()
        .iter()
        .filter(|s| s.kind == ServiceKind::Nginx)
        .count();
    assert_eq!(nginx, 1);
}

#[tokio::test]
async fn test_uniqueness_checked_for_unfocused_environment() {
    let backend = FakeBackend::new()
        .with_environment("e1", "Dev", Inactive)
        .with_environment("e2", "Staging", Inactive)
        .with_service("s1", "e2", ServiceKind::Redis, "7.2");
    let h = Harness::start(backend, settings(true, false, &[])).await;
    assert_ok!(h.coordinator.select_environment("e1").await);

    let err = h
        .coordinator
        .create_service("e2", ServiceKind::Redis, "7.4")
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict { .. }));
    assert_eq!(h.backend.count("createService"), 0);

    // Custom services are unbounded
    assert_ok!(h.coordinator.create_service("e2", ServiceKind::Custom, "-").await);
    assert_ok!(h.coordinator.create_service("e2", ServiceKind::Custom, "-").await);
    assert_eq!(h.backend.count("createService"), 2);
}

#[tokio::test]
async fn test_environment_names_are_unique_and_non_empty() {
    let h = Harness::start(FakeBackend::new(), settings(true, false, &[])).await;

    let dev = assert_ok!(h.coordinator.create_environment("Dev").await);
    let staging = assert_ok!(h.coordinator.create_environment("  Staging ").await);
    assert_eq!(staging.name, "Staging");

    assert!(matches!(
        h.coordinator.create_environment(" Dev ").await,
        Err(CoordinatorError::DuplicateName { .. })
    ));
    assert!(matches!(
        h.coordinator.create_environment("   ").await,
        Err(CoordinatorError::EmptyName)
    ));
    assert!(matches!(
        h.coordinator.rename_environment(&staging.id, "Dev").await,
        Err(CoordinatorError::DuplicateName { .. })
    ));

    // Renaming to its own name is fine
    assert_ok!(h.coordinator.rename_environment(&dev.id, "Dev").await);
    assert_ok!(h.coordinator.rename_environment(&dev.id, "Local").await);
    assert_eq!(h.coordinator.state().environment(&dev.id).unwrap().name, "Local");
    assert_eq!(h.backend.count("createEnvironment"), 2);
}

#[tokio::test]
async fn test_history_follows_activation_order_without_exclusion() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive);
    let h = Harness::start(backend, settings(false, false, &[])).await;

    assert_ok!(h.coordinator.activate_environment("e1").await);
    assert_ok!(h.coordinator.activate_environment("e2").await);
    assert_eq!(h.coordinator.history().ids(), vec!["e1", "e2"]);
    assert_eq!(status(&h, "e1"), Some(Active));
    assert_eq!(status(&h, "e2"), Some(Active));

    assert_ok!(h.coordinator.deactivate_environment("e1").await);
    assert_eq!(h.coordinator.history().ids(), vec!["e2"]);

    assert_ok!(h.coordinator.activate_environment("e1").await);
    assert_eq!(h.coordinator.history().ids(), vec!["e2", "e1"]);
    assert_eq!(h.persisted_history().await, vec!["e2", "e1"]);
}

#[tokio::test]
async fn test_exclusive_activation_deactivates_others_first() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive);
    let h = Harness::start(backend, settings(true, false, &[])).await;

    assert_ok!(h.coordinator.activate_environment("e1").await);
    assert_ok!(h.coordinator.activate_environment("e2").await);

    assert_eq!(status(&h, "e1"), Some(Inactive));
    assert_eq!(status(&h, "e2"), Some(Active));
    assert_eq!(h.coordinator.history().ids(), vec!["e2"]);
    assert_eq!(h.persisted_history().await, vec!["e2"]);

    let order: Vec<(&str, Option<String>)> = h
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.method.ends_with("Environment") && c.method != "listEnvironments")
        .map(|c| (c.method, c.target))
        .collect();
    assert_eq!(
        order,
        vec![
            ("activateEnvironment", Some("e1".to_string())),
            ("deactivateEnvironment", Some("e1".to_string())),
            ("activateEnvironment", Some("e2".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_failed_deactivation_does_not_block_the_rest() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Active)
        .with_environment("e2", "Two", Active)
        .with_environment("e3", "Three", Inactive);
    let mut h = Harness::start(backend, settings(true, false, &["e1", "e2"])).await;
    h.backend.fail("deactivateEnvironment", "e1");

    assert_ok!(h.coordinator.activate_environment("e3").await);

    assert_eq!(status(&h, "e1"), Some(Active));
    assert_eq!(status(&h, "e2"), Some(Inactive));
    assert_eq!(status(&h, "e3"), Some(Active));
    assert_eq!(h.backend.count("deactivateEnvironment"), 2);

    let warnings = h.notifications(NotificationLevel::Warning);
    assert!(warnings.iter().any(|w| w.contains("One")), "{:?}", warnings);
}

#[tokio::test]
async fn test_failed_activation_leaves_status_and_history() {
    let backend = FakeBackend::new().with_environment("e1", "One", Inactive);
    let mut h = Harness::start(backend, settings(false, false, &[])).await;
    h.backend.fail("activateEnvironment", "e1");

    let err = h.coordinator.activate_environment("e1").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Gateway { .. }));
    assert_eq!(status(&h, "e1"), Some(Inactive));
    assert!(h.coordinator.history().ids().is_empty());
    assert!(!h.notifications(NotificationLevel::Error).is_empty());
}

#[tokio::test]
async fn test_auto_resume_skips_missing_and_keeps_others_active() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive)
        .with_environment("e3", "Three", Inactive);
    let h = Harness::start(backend, settings(true, true, &["e1", "e5", "", "e2"])).await;

    let report = h.coordinator.auto_resume().await;

    assert_eq!(report.succeeded, vec!["e1", "e2"]);
    assert_eq!(report.skipped, vec!["e5"]);
    assert!(report.failed.is_empty());
    assert_eq!(status(&h, "e1"), Some(Active));
    assert_eq!(status(&h, "e2"), Some(Active));
    assert_eq!(status(&h, "e3"), Some(Inactive));
    assert_eq!(h.backend.count("deactivateEnvironment"), 0);

    let targets: Vec<_> = h
        .backend
        .calls_to("activateEnvironment")
        .into_iter()
        .filter_map(|c| c.target)
        .collect();
    assert_eq!(targets, vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_auto_resume_disabled_is_noop() {
    let backend = FakeBackend::new().with_environment("e1", "One", Inactive);
    let h = Harness::start(backend, settings(true, false, &["e1"])).await;

    let report = h.coordinator.auto_resume().await;
    assert!(report.succeeded.is_empty());
    assert_eq!(h.backend.count("activateEnvironment"), 0);
}

#[tokio::test]
async fn test_activation_is_idempotent() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Active)
        .with_environment("e2", "Two", Inactive);
    let h = Harness::start(backend, settings(true, false, &["e1"])).await;
    let token = h.coordinator.signal().current();

    assert_ok!(h.coordinator.activate_environment("e1").await);
    assert_ok!(h.coordinator.deactivate_environment("e2").await);

    assert_eq!(h.backend.count("activateEnvironment"), 0);
    assert_eq!(h.backend.count("deactivateEnvironment"), 0);
    assert_eq!(h.coordinator.signal().current(), token);
    assert_eq!(h.coordinator.history().ids(), vec!["e1"]);
}

#[tokio::test]
async fn test_toggle_focuses_and_flips() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive)
        .with_service("s1", "e2", ServiceKind::Node, "20");
    let h = Harness::start(backend, settings(true, false, &[])).await;
    let token = h.coordinator.signal().current();

    assert_ok!(h.coordinator.toggle_environment("e2").await);
    assert!(h.coordinator.state().is_current_environment("e2"));
    assert_eq!(status(&h, "e2"), Some(Active));
    // Services were re-read after activation
    assert_eq!(h.coordinator.state().service("s1").unwrap().status, Active);
    assert!(h.coordinator.signal().current() > token);
    assert_eq!(h.persisted_history().await, vec!["e2"]);

    assert_ok!(h.coordinator.toggle_environment("e2").await);
    assert_eq!(status(&h, "e2"), Some(Inactive));
    assert!(h.persisted_history().await.is_empty());
}

#[tokio::test]
async fn test_toggle_focuses_even_when_activation_fails() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive);
    let h = Harness::start(backend, settings(true, false, &[])).await;
    h.backend.fail("activateEnvironment", "e2");

    assert!(h.coordinator.toggle_environment("e2").await.is_err());
    assert!(h.coordinator.state().is_current_environment("e2"));
    assert_eq!(status(&h, "e2"), Some(Inactive));
}

#[tokio::test]
async fn test_deactivate_all_forces_everything_inactive() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Active)
        .with_environment("e2", "Two", Active)
        .with_environment("e3", "Three", Inactive);
    let h = Harness::start(backend, settings(false, true, &["e1", "e2"])).await;
    h.backend.fail("deactivateEnvironment", "e2");

    let report = h.coordinator.deactivate_all().await;

    assert_eq!(report.succeeded, vec!["e1"]);
    assert_eq!(report.failed_ids(), vec!["e2"]);
    assert!(h
        .coordinator
        .state()
        .environments()
        .iter()
        .all(|e| e.status == Inactive));
    // Backend still has e2 on
    assert_eq!(h.backend.environment_status("e2"), Some(Active));
    // Shutdown keeps the resume set
    assert_eq!(h.coordinator.history().ids(), vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_deactivate_others_except_continues_on_error() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Active)
        .with_environment("e2", "Two", Active)
        .with_environment("e3", "Three", Active);
    let h = Harness::start(backend, settings(false, false, &["e1", "e2", "e3"])).await;
    h.backend.fail("deactivateEnvironment", "e1");

    let report = h.coordinator.deactivate_others_except("e3").await;

    assert_eq!(report.failed_ids(), vec!["e1"]);
    assert_eq!(report.succeeded, vec!["e2"]);
    assert_eq!(status(&h, "e3"), Some(Active));
    assert_eq!(h.persisted_history().await, vec!["e1", "e3"]);
}

#[tokio::test]
async fn test_missing_installation_blocks_service_activation() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_service("s1", "e1", ServiceKind::Postgresql, "16")
        .with_service("s2", "e1", ServiceKind::Custom, "-")
        .with_installed(ServiceKind::Postgresql, &["15"]);
    let h = Harness::start(backend, settings(true, false, &[])).await;

    let err = h.coordinator.activate_service("s1").await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::NotInstalled { kind: ServiceKind::Postgresql, ref version } if version == "16"
    ));
    assert_eq!(h.backend.count("activateService"), 0);

    // Synthetic kinds skip the check
    assert_ok!(h.coordinator.activate_service("s2").await);
    assert_eq!(h.backend.count("installedVersions"), 1);
    assert_eq!(h.backend.service_status("s2"), Some(Active));
}

#[tokio::test]
async fn test_service_runtime_requires_activation() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_service("s1", "e1", ServiceKind::Redis, "7.2")
        .with_installed(ServiceKind::Redis, &["7.2"]);
    let h = Harness::start(backend, settings(true, false, &[])).await;

    assert!(matches!(
        h.coordinator.start_service("s1").await,
        Err(CoordinatorError::ServiceInactive { .. })
    ));
    assert_eq!(h.backend.count("startService"), 0);

    assert_ok!(h.coordinator.activate_service("s1").await);
    assert_ok!(h.coordinator.start_service("s1").await);
    assert_eq!(h.coordinator.state().runtime_status("s1"), RuntimeStatus::Running);

    let polled = h.coordinator.poll_runtime_status().await;
    assert_eq!(polled.get("s1"), Some(&RuntimeStatus::Running));

    assert_ok!(h.coordinator.deactivate_service("s1").await);
    assert_eq!(h.coordinator.state().runtime_status("s1"), RuntimeStatus::Stopped);
    let polled = h.coordinator.poll_runtime_status().await;
    assert_eq!(polled.get("s1"), Some(&RuntimeStatus::Stopped));
    assert_eq!(h.backend.count("serviceRuntimeStatus"), 1);
}

#[tokio::test]
async fn test_delete_refused_while_active() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Active)
        .with_environment("e2", "Two", Inactive);
    let h = Harness::start(backend, settings(false, false, &["e1"])).await;

    assert!(matches!(
        h.coordinator.delete_environment("e1").await,
        Err(CoordinatorError::StillActive { .. })
    ));
    assert_eq!(h.backend.count("deleteEnvironment"), 0);

    assert_ok!(h.coordinator.delete_environment("e2").await);
    assert!(h.coordinator.state().environment("e2").is_none());
    assert!(matches!(
        h.coordinator.activate_environment("e2").await,
        Err(CoordinatorError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_update_and_delete_service() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_service("s1", "e1", ServiceKind::Php, "8.2");
    let h = Harness::start(backend, settings(true, false, &[])).await;

    assert_ok!(h.coordinator.update_service("s1", ServicePatch::default()).await);
    assert_eq!(h.backend.count("updateService"), 0);

    let patch = ServicePatch {
        version: Some("8.3".into()),
        ..Default::default()
    };
    assert_ok!(h.coordinator.update_service("s1", patch).await);
    assert_eq!(h.coordinator.state().service("s1").unwrap().version, "8.3");

    assert_ok!(h.coordinator.delete_service("s1").await);
    assert!(h.coordinator.state().services().is_empty());
}

#[tokio::test]
async fn test_reorder_environments() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive)
        .with_environment("e3", "Three", Inactive);
    let h = Harness::start(backend, settings(true, false, &[])).await;

    let ids = vec!["e3".to_string(), "e1".to_string(), "e2".to_string()];
    assert_ok!(h.coordinator.reorder_environments(&ids).await);

    let order: Vec<String> = h
        .coordinator
        .state()
        .environments()
        .iter()
        .map(|e| e.id.clone())
        .collect();
    assert_eq!(order, ids);

    let unknown = vec!["e9".to_string()];
    assert!(matches!(
        h.coordinator.reorder_environments(&unknown).await,
        Err(CoordinatorError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_failed_services_warn_without_rollback() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_service("s1", "e1", ServiceKind::Nginx, "1.25")
        .with_service("s2", "e1", ServiceKind::Redis, "7.2")
        .break_service("s1");
    let mut h = Harness::start(backend, settings(false, false, &[])).await;

    assert_ok!(h.coordinator.activate_environment("e1").await);

    assert_eq!(status(&h, "e1"), Some(Active));
    assert_eq!(h.coordinator.history().ids(), vec!["e1"]);
    assert_eq!(h.backend.count("deactivateEnvironment"), 0);
    assert_eq!(h.backend.count("deactivateService"), 0);

    let state = h.coordinator.state();
    assert_eq!(state.service("s1").unwrap().status, Inactive);
    assert_eq!(state.service("s2").unwrap().status, Active);

    let warnings = h.notifications(NotificationLevel::Warning);
    assert_eq!(warnings.len(), 1, "{:?}", warnings);
    assert!(warnings[0].contains("port already in use"), "{:?}", warnings);
}

#[tokio::test]
async fn test_concurrent_creates_keep_names_unique() {
    let backend = FakeBackend::new().with_latency(Duration::from_millis(10));
    let h = Harness::start(backend, settings(true, false, &[])).await;

    let (first, second) = tokio::join!(
        h.coordinator.create_environment("Dev"),
        h.coordinator.create_environment("Dev")
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(CoordinatorError::DuplicateName { .. })));
    assert_eq!(h.backend.count("createEnvironment"), 1);
    let names: Vec<String> = h
        .coordinator
        .state()
        .environments()
        .iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(names, vec!["Dev"]);
}

#[tokio::test]
async fn test_concurrent_service_creates_make_one_gateway_call() {
    let backend = FakeBackend::new()
        .with_environment("e1", "Dev", Inactive)
        .with_latency(Duration::from_millis(10));
    let h = Harness::start(backend, settings(true, false, &[])).await;
    assert!(h.coordinator.state().is_current_environment("e1"));

    let (first, second) = tokio::join!(
        h.coordinator.create_service("e1", ServiceKind::Nginx, "1.25"),
        h.coordinator.create_service("e1", ServiceKind::Nginx, "1.27")
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(CoordinatorError::Conflict { kind: ServiceKind::Nginx })
    ));
    assert_eq!(h.backend.count("createService"), 1);
}

#[tokio::test]
async fn test_kind_check_relists_after_failed_refresh() {
    let backend = FakeBackend::new()
        .with_environment("e0", "Zero", Inactive)
        .with_environment("e1", "Dev", Inactive)
        .with_service("s1", "e1", ServiceKind::Nginx, "1.25");
    let h = Harness::start(backend, settings(true, false, &[])).await;

    h.backend.fail("listServices", "e1");
    assert!(h.coordinator.select_environment("e1").await.is_err());
    assert!(h.coordinator.state().services().is_empty());
    h.backend.recover("listServices", "e1");

    let err = h
        .coordinator
        .create_service("e1", ServiceKind::Nginx, "1.27")
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict { kind: ServiceKind::Nginx }));
    assert_eq!(h.backend.count("createService"), 0);
}

#[tokio::test]
async fn test_concurrent_toggles_do_not_interleave() {
    let backend = FakeBackend::new()
        .with_environment("e1", "One", Inactive)
        .with_environment("e2", "Two", Inactive)
        .with_latency(Duration::from_millis(5));
    let h = Harness::start(backend, settings(false, false, &[])).await;
    let before = h.backend.calls().len();

    let (first, second) = tokio::join!(
        h.coordinator.toggle_environment("e1"),
        h.coordinator.toggle_environment("e2")
    );
    assert_ok!(first);
    assert_ok!(second);

    assert_eq!(h.backend.max_concurrent_calls(), 1);
    let targets: Vec<String> = h.backend.calls()[before..]
        .iter()
        .filter_map(|c| c.target.clone())
        .collect();
    let last_e1 = targets.iter().rposition(|t| t == "e1").unwrap();
    let first_e2 = targets.iter().position(|t| t == "e2").unwrap();
    assert!(last_e1 < first_e2, "{:?}", targets);

    assert_eq!(status(&h, "e1"), Some(Active));
    assert_eq!(status(&h, "e2"), Some(Active));
    assert_eq!(h.coordinator.history().ids(), vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_runtime_monitor_stops_with_coordinator() {
    let backend = FakeBackend::new().with_environment("e1", "One", Inactive);
    let h = Harness::start(backend, settings(true, false, &[])).await;

    let monitor = spawn_runtime_monitor(&h.coordinator, Duration::from_secs(60));
    tokio::task::yield_now().await;
    drop(h);

    let finished = tokio::time::timeout(Duration::from_secs(5), monitor).await;
    assert!(matches!(finished, Ok(Ok(()))));
}
