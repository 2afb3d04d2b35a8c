// tests/startup.rs

//! Startup sequence: gate, readiness, custom container, first session.

#![cfg(unix)]

mod common;

use common::{FakePlatform, FakeProbe, ScriptedPrompter, context, document, fake_runtime};
use dangerzone::platform::GroupStatus;
use dangerzone::privilege::LOGOUT_REQUIRED_MESSAGE;
use dangerzone::startup::{self, StartupOptions, StartupOutcome};
use dangerzone::{DEFAULT_CONTAINER_NAME, ElevationChoice, ElevationMode, Error, WorkflowStage};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

#[tokio::test]
async fn test_not_installed_aborts_before_any_session() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::new(GroupStatus::Member, fake_runtime(dir.path())));
    let ctx = context(&dir, platform.clone());
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(false, false)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::TypePassword, true);

    let options = StartupOptions {
        custom_container: Some("my-containerXYZ".to_string()),
        document: Some(document(dir.path(), "a.pdf", "0")),
    };
    let result = startup::start(&ctx, &prompter, &readiness, &invoker, options).await;

    assert!(matches!(result, Err(Error::RuntimeNotInstalled)));
    assert_eq!(invoker.spawned(), 0);
    assert_eq!(platform.service_starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ready_with_document() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::new(GroupStatus::Member, fake_runtime(dir.path())));
    let ctx = context(&dir, platform);
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, true)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::Cancel, false);

    let doc = document(dir.path(), "a.pdf", "0");
    let options = StartupOptions {
        custom_container: None,
        document: Some(doc.clone()),
    };
    let outcome = startup::start(&ctx, &prompter, &readiness, &invoker, options)
        .await
        .unwrap();

    let StartupOutcome::Ready(launched) = outcome else {
        panic!("expected a launched application");
    };
    assert_eq!(launched.container_name, DEFAULT_CONTAINER_NAME);
    assert_eq!(launched.elevation, None);
    let session = launched.sessions.session(&launched.session_id).unwrap();
    assert_eq!(session.document_path(), Some(doc.as_path()));
    assert_eq!(session.stage(), WorkflowStage::ConfiguringOptions);
    assert_eq!(prompter.asks(), 0);
    assert_eq!(invoker.spawned(), 0);
}

#[tokio::test]
async fn test_unreadable_document_aborts_first() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::not_member(fake_runtime(dir.path())));
    let ctx = context(&dir, platform);
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, true)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::TypePassword, true);

    let options = StartupOptions {
        custom_container: None,
        document: Some(dir.path().join("missing.pdf")),
    };
    let err = startup::start(&ctx, &prompter, &readiness, &invoker, options)
        .await
        .err()
        .unwrap();

    assert!(common::is_unreadable(&err));
    assert_eq!(prompter.asks(), 0);
}

#[tokio::test]
async fn test_custom_container_must_match_exactly() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::new(GroupStatus::Member, fake_runtime(dir.path())));
    let ctx = context(&dir, platform);
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, true)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::Cancel, false);

    let options = StartupOptions {
        custom_container: Some("my-container".to_string()),
        document: None,
    };
    let err = startup::start(&ctx, &prompter, &readiness, &invoker, options)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::ContainerNotFound(ref name) if name == "my-container"));

    let options = StartupOptions {
        custom_container: Some("my-containerXYZ".to_string()),
        document: None,
    };
    let outcome = startup::start(&ctx, &prompter, &readiness, &invoker, options)
        .await
        .unwrap();
    let StartupOutcome::Ready(launched) = outcome else {
        panic!("expected a launched application");
    };
    assert_eq!(launched.container_name, "my-containerXYZ");
    assert_eq!(invoker.spawned(), 2);
}

#[tokio::test]
async fn test_declined_elevation_aborts() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::not_member(fake_runtime(dir.path())));
    let ctx = context(&dir, platform);
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, true)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::Cancel, true);

    let result = startup::start(&ctx, &prompter, &readiness, &invoker, StartupOptions::default()).await;
    assert!(matches!(result, Err(Error::AuthorizationDeclined)));
    assert_eq!(invoker.spawned(), 0);
    assert!(ctx.settings.elevation_mode().is_none());
}

#[tokio::test]
async fn test_joining_group_requires_logout() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::not_member(fake_runtime(dir.path())));
    let ctx = context(&dir, platform.clone());
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, true)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::JoinGroup, true);

    let outcome = startup::start(&ctx, &prompter, &readiness, &invoker, StartupOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, StartupOutcome::LogoutRequired));
    assert_eq!(platform.group_adds.load(Ordering::SeqCst), 1);
    assert_eq!(
        ctx.settings.elevation_mode(),
        Some(ElevationMode::JoinPrivilegedGroup)
    );
    assert_eq!(
        prompter.notices.lock().unwrap().as_slice(),
        [LOGOUT_REQUIRED_MESSAGE]
    );
    assert_eq!(invoker.spawned(), 0);
}

#[tokio::test]
async fn test_stopped_runtime_declined() {
    let dir = TempDir::new().unwrap();
    let platform = Arc::new(FakePlatform::new(GroupStatus::Member, fake_runtime(dir.path())));
    let ctx = context(&dir, platform.clone());
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, false)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::Cancel, false);

    let result = startup::start(&ctx, &prompter, &readiness, &invoker, StartupOptions::default()).await;
    assert!(matches!(result, Err(Error::RuntimeNotReady)));
    assert_eq!(platform.service_starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_virtualized_runtime_sessions_start_released() {
    let dir = TempDir::new().unwrap();
    let mut fake = FakePlatform::new(GroupStatus::NotApplicable, fake_runtime(dir.path()));
    fake.virtualization = true;
    let ctx = context(&dir, Arc::new(fake));
    let readiness = ctx
        .readiness_checker()
        .with_probe(Arc::new(FakeProbe::new(true, true)));
    let invoker = ctx.invoker();
    let prompter = ScriptedPrompter::new(ElevationChoice::Cancel, false);

    let outcome = startup::start(&ctx, &prompter, &readiness, &invoker, StartupOptions::default())
        .await
        .unwrap();
    let StartupOutcome::Ready(launched) = outcome else {
        panic!("expected a launched application");
    };
    let session = launched.sessions.session(&launched.session_id).unwrap();
    assert_eq!(session.stage(), WorkflowStage::DocumentSelected);
}
