use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use santander_config::{HelperConfig, LogSettings, OutputPermissions, OverlapPolicy};
use santander_events::{Event, EventBus};
use santander_helper::Dispatcher;
use santander_ops::{ErrorKind, ExecutionResult, OperationDescriptor};
use santander_telemetry::Metrics;
use santander_test_support::assert::{collect_until, stages_for};
use santander_test_support::fixtures::{Sandbox, entry_names, running_as_root};
use santander_test_support::renditions;
use uuid::Uuid;

type TestResult<T> = anyhow::Result<T>;

fn config(root: &Path) -> HelperConfig {
    HelperConfig {
        socket_path: root.join("helper.sock"),
        allowed_roots: vec![root.to_path_buf()],
        overlap_policy: OverlapPolicy::Serialize,
        permissions: OutputPermissions::default(),
        logging: LogSettings {
            level: "info".to_string(),
            format: None,
        },
        event_capacity: 256,
    }
}

fn dispatcher(config: &HelperConfig) -> TestResult<Dispatcher> {
    Ok(Dispatcher::new(config, EventBus::with_capacity(256), Metrics::new()?))
}

fn is_terminal_for(id: Uuid) -> impl Fn(&Event) -> bool {
    move |event| {
        matches!(
            event,
            Event::OperationCompleted { operation_id, .. } | Event::OperationFailed { operation_id, .. }
                if *operation_id == id
        )
    }
}

#[tokio::test]
async fn extract_writes_every_rendition_into_new_destination() -> TestResult<()> {
    let sandbox = Sandbox::new()?;
    let dispatcher = dispatcher(&config(sandbox.root()))?;
    let destination = sandbox.path("Assets-Extracted");
    assert!(!destination.exists());

    let result = dispatcher
        .dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::pair(), &destination),
        )
        .await;

    assert_eq!(result, ExecutionResult::success(Some(destination.clone())));
    assert_eq!(entry_names(&destination)?, vec!["A.png", "B.png"]);
    assert_eq!(fs::read(destination.join("A.png"))?, renditions::PIXEL_PNG);
    Ok(())
}

#[tokio::test]
async fn lifecycle_events_follow_stage_order() -> TestResult<()> {
    let sandbox = Sandbox::new()?;
    let dispatcher = dispatcher(&config(sandbox.root()))?;
    let mut stream = dispatcher.events().subscribe(None);
    let id = Uuid::new_v4();

    let result = dispatcher
        .dispatch(
            id,
            OperationDescriptor::create_directory(sandbox.path("fresh")),
        )
        .await;
    assert!(result.is_success());

    let events = collect_until(&mut stream, is_terminal_for(id)).await?;
    assert!(matches!(
        events.first(),
        Some(Event::OperationReceived { kind, .. }) if kind == "create_directory"
    ));
    assert_eq!(
        stages_for(&events, id),
        vec!["validating", "executing", "completed"]
    );
    assert!(matches!(events.last(), Some(Event::OperationCompleted { .. })));
    Ok(())
}

#[tokio::test]
async fn invalid_requests_never_reach_execution() -> TestResult<()> {
    let sandbox = Sandbox::new()?;
    let dispatcher = dispatcher(&config(sandbox.root()))?;
    let mut stream = dispatcher.events().subscribe(None);
    let id = Uuid::new_v4();

    let result = dispatcher
        .dispatch(
            id,
            OperationDescriptor::extract_catalog(Vec::new(), sandbox.path("empty")),
        )
        .await;
    assert!(matches!(
        result,
        ExecutionResult::Failure {
            kind: ErrorKind::InvalidRequest,
            ..
        }
    ));
    assert!(!sandbox.path("empty").exists());

    let events = collect_until(&mut stream, is_terminal_for(id)).await?;
    assert_eq!(stages_for(&events, id), vec!["validating", "completed"]);
    Ok(())
}

#[tokio::test]
async fn destinations_outside_roots_are_rejected() -> TestResult<()> {
    let allowed = Sandbox::new()?;
    let elsewhere = Sandbox::new()?;
    let dispatcher = dispatcher(&config(allowed.root()))?;

    let result = dispatcher
        .dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::pair(), elsewhere.path("out")),
        )
        .await;
    match result {
        ExecutionResult::Failure { kind, message } => {
            assert_eq!(kind, ErrorKind::InvalidRequest);
            assert!(message.contains("outside_allowed_roots"), "{message}");
        }
        ExecutionResult::Success { .. } => anyhow::bail!("escape must be rejected"),
    }
    assert!(entry_names(elsewhere.root())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unwritable_parent_reports_permission_denied() -> TestResult<()> {
    if running_as_root() {
        return Ok(());
    }
    let sandbox = Sandbox::new()?;
    let locked = sandbox.create_dir("locked")?;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;
    let dispatcher = dispatcher(&config(sandbox.root()))?;

    let result = dispatcher
        .dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::pair(), locked.join("out")),
        )
        .await;

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
    assert!(matches!(
        result,
        ExecutionResult::Failure {
            kind: ErrorKind::PermissionDenied,
            ..
        }
    ));
    assert!(entry_names(&locked)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn disjoint_operations_both_complete() -> TestResult<()> {
    let sandbox = Sandbox::new()?;
    let dispatcher = dispatcher(&config(sandbox.root()))?;
    let first = sandbox.path("first");
    let second = sandbox.path("second");

    let (a, b) = tokio::join!(
        dispatcher.dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::pair(), &first),
        ),
        dispatcher.dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::mixed(), &second),
        ),
    );

    assert_eq!(a, ExecutionResult::success(Some(first.clone())));
    assert_eq!(b, ExecutionResult::success(Some(second.clone())));
    assert_eq!(entry_names(&first)?.len(), 2);
    assert_eq!(entry_names(&second)?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn overlapping_extractions_never_interleave() -> TestResult<()> {
    let sandbox = Sandbox::new()?;
    let dispatcher = dispatcher(&config(sandbox.root()))?;
    let destination = sandbox.path("shared");

    let (a, b) = tokio::join!(
        dispatcher.dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::pair(), &destination),
        ),
        dispatcher.dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::mixed(), &destination),
        ),
    );

    let outcomes = [a, b];
    let succeeded = outcomes.iter().filter(|result| result.is_success()).count();
    assert_eq!(succeeded, 1);
    assert!(outcomes.iter().any(|result| matches!(
        result,
        ExecutionResult::Failure {
            kind: ErrorKind::AlreadyExists,
            ..
        }
    )));
    let names = entry_names(&destination)?;
    assert!(
        names == vec!["A.png", "B.png"] || names == vec!["AccentColor.json", "AppIcon.png", "Glyph.svg"],
        "{names:?}"
    );
    assert_eq!(entry_names(sandbox.root())?, vec!["shared"]);
    Ok(())
}

#[tokio::test]
async fn configured_modes_apply_to_outputs() -> TestResult<()> {
    let sandbox = Sandbox::new()?;
    let mut config = config(sandbox.root());
    config.permissions = OutputPermissions {
        file_mode: Some(0o640),
        dir_mode: Some(0o750),
        owner: None,
        group: None,
    };
    let dispatcher = dispatcher(&config)?;
    let destination = sandbox.path("moded");

    let result = dispatcher
        .dispatch(
            Uuid::new_v4(),
            OperationDescriptor::extract_catalog(renditions::pair(), &destination),
        )
        .await;
    assert!(result.is_success());
    assert_eq!(fs::metadata(&destination)?.permissions().mode() & 0o777, 0o750);
    assert_eq!(
        fs::metadata(destination.join("A.png"))?.permissions().mode() & 0o777,
        0o640
    );
    Ok(())
}
