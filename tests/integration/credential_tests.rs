//! Credential cache and re-prompt tests against the coordinator

mod support;

use envswitch::core::error::CoordinatorError;
use envswitch_protocol::{ActivationStatus, ServiceKind};
use secrecy::{ExposeSecret, SecretString};
use support::{settings, FakeBackend, Harness, ScriptedPrompt};
use tokio_test::assert_ok;

fn protected_backend() -> FakeBackend {
    FakeBackend::new()
        .with_password("secret")
        .with_environment("e1", "One", ActivationStatus::Inactive)
        .with_service("hosts", "e1", ServiceKind::Hosts, "-")
        .protect("e1")
}

#[tokio::test]
async fn test_required_call_prompts_then_caches() {
    let h = Harness::with_prompt(
        protected_backend(),
        settings(true, false, &[]),
        ScriptedPrompt::always(Some("secret")),
    )
    .await;

    assert_ok!(h.coordinator.activate_service("hosts").await);
    assert_ok!(h.coordinator.deactivate_service("hosts").await);

    assert_eq!(h.prompt.calls(), 1);
    let credentials: Vec<_> = h
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.method.ends_with("Service") && c.method != "listServices")
        .map(|c| c.credential)
        .collect();
    assert_eq!(
        credentials,
        vec![Some("secret".to_string()), Some("secret".to_string())]
    );
    assert!(h.coordinator.credentials().is_cached());
}

#[tokio::test]
async fn test_wrong_password_reprompts_exactly_once() {
    let h = Harness::with_prompt(
        protected_backend(),
        settings(true, false, &[]),
        ScriptedPrompt::script(&[Some("wrong"), Some("still wrong")], Some("secret")),
    )
    .await;

    let err = h.coordinator.activate_service("hosts").await.unwrap_err();

    assert!(matches!(err, CoordinatorError::Gateway { .. }));
    assert_eq!(h.prompt.calls(), 2);
    assert_eq!(h.backend.count("activateService"), 2);
    assert!(!h.coordinator.credentials().is_cached());
    assert_eq!(h.backend.service_status("hosts"), Some(ActivationStatus::Inactive));
}

#[tokio::test]
async fn test_second_attempt_succeeds_after_reprompt() {
    let h = Harness::with_prompt(
        protected_backend(),
        settings(true, false, &[]),
        ScriptedPrompt::script(&[Some("wrong")], Some("secret")),
    )
    .await;

    assert_ok!(h.coordinator.activate_service("hosts").await);

    assert_eq!(h.prompt.calls(), 2);
    let cached = h.coordinator.credentials().get().unwrap();
    assert_eq!(cached.expose_secret(), "secret");
}

#[tokio::test]
async fn test_opportunistic_environment_activation_reprompts_once() {
    let h = Harness::with_prompt(
        protected_backend(),
        settings(true, false, &[]),
        ScriptedPrompt::always(Some("wrong")),
    )
    .await;

    let err = h.coordinator.activate_environment("e1").await.unwrap_err();

    assert!(matches!(err, CoordinatorError::Gateway { .. }));
    // First attempt goes out without a credential
    assert_eq!(h.prompt.calls(), 1);
    let attempts = h.backend.calls_to("activateEnvironment");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].credential, None);
    assert_eq!(attempts[1].credential.as_deref(), Some("wrong"));
    assert!(h.coordinator.history().ids().is_empty());
}

#[tokio::test]
async fn test_stale_cached_credential_is_replaced() {
    let h = Harness::with_prompt(
        protected_backend(),
        settings(true, false, &[]),
        ScriptedPrompt::always(Some("secret")),
    )
    .await;
    h.coordinator
        .credentials()
        .set(SecretString::from("old".to_string()));

    assert_ok!(h.coordinator.activate_environment("e1").await);

    assert_eq!(h.prompt.calls(), 1);
    let attempts = h.backend.calls_to("activateEnvironment");
    assert_eq!(attempts[0].credential.as_deref(), Some("old"));
    assert_eq!(attempts[1].credential.as_deref(), Some("secret"));
    assert_eq!(
        h.coordinator.credentials().get().unwrap().expose_secret(),
        "secret"
    );
}

#[tokio::test]
async fn test_cancelled_prompt_makes_no_call() {
    let h = Harness::with_prompt(
        protected_backend(),
        settings(true, false, &[]),
        ScriptedPrompt::always(None),
    )
    .await;

    let err = h.coordinator.activate_service("hosts").await.unwrap_err();

    assert!(matches!(err, CoordinatorError::CredentialCancelled));
    assert_eq!(h.backend.count("activateService"), 0);
}
