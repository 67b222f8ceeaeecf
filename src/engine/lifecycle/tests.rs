//! Unit tests for sandbox creation payloads and lifecycle ordering.

use std::sync::{Arc, Mutex};

use rstest::{fixture, rstest};

use super::*;
use crate::engine::mock_runtime::{MockRuntime, engine_error};

fn io_error(message: impl Into<String>) -> std::io::Error {
    std::io::Error::other(message.into())
}

#[fixture]
fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
}

#[fixture]
fn spec() -> SandboxSpec {
    SandboxSpec::new("python-sandbox:latest", &SandboxConfig::default())
        .expect("default image is valid")
        .with_name(Some(String::from("sandjob-job-1")))
}

fn runtime_creating(id: &'static str) -> MockRuntime {
    let mut engine = MockRuntime::new();
    engine
        .expect_create()
        .times(1)
        .returning(move |_, _| Box::pin(async move { Ok(String::from(id)) }));
    engine
}

#[rstest]
fn host_config_enforces_platform_limits(spec: SandboxSpec) {
    let body = spec.create_body();
    let host_config = body.host_config.expect("host config should be set");

    assert_eq!(host_config.memory, Some(536_870_912));
    assert_eq!(host_config.memory_swap, Some(536_870_912));
    assert_eq!(host_config.cpu_period, Some(100_000));
    assert_eq!(host_config.cpu_quota, Some(100_000));
    assert_eq!(host_config.network_mode.as_deref(), Some("none"));
    assert_eq!(
        host_config.binds,
        Some(vec![String::from("job-storage:/workspace")])
    );
    assert_eq!(body.image.as_deref(), Some("python-sandbox:latest"));
}

#[rstest]
#[case::plain("", "cd /workspace && python main.py")]
#[case::with_install(
    "pip install -r requirements.txt && ",
    "cd /workspace && pip install -r requirements.txt && python main.py"
)]
fn command_runs_main_from_workspace(
    spec: SandboxSpec,
    #[case] prefix: &str,
    #[case] expected: &str,
) {
    let with_prefix = spec.with_install_prefix(prefix);

    assert_eq!(
        with_prefix.cmd(),
        [String::from("sh"), String::from("-c"), String::from(expected)]
    );
}

#[rstest]
#[case::empty("")]
#[case::whitespace("   ")]
fn blank_image_is_rejected(#[case] image: &str) {
    let error = SandboxSpec::new(image, &SandboxConfig::default()).expect_err("blank image");

    assert!(matches!(
        error,
        SandjobError::Config(ConfigError::MissingRequired { ref field }) if field == "image"
    ));
}

#[rstest]
#[case::bridged("bridge", 100_000, "sandbox.network_mode")]
#[case::four_cores("none", 400_000, "sandbox.cpu_quota")]
fn limits_that_weaken_isolation_are_rejected(
    #[case] network_mode: &str,
    #[case] cpu_quota: i64,
    #[case] field: &str,
) {
    let limits = SandboxConfig {
        network_mode: String::from(network_mode),
        cpu_quota,
        ..SandboxConfig::default()
    };

    let error = SandboxSpec::new("python-sandbox:latest", &limits).expect_err("weakened limits");

    assert!(matches!(
        error,
        SandjobError::Config(ConfigError::InvalidValue { field: ref name, .. }) if name == field
    ));
}

#[rstest]
fn create_options_carry_the_name(spec: SandboxSpec) {
    let options = spec.create_options().expect("named spec has options");
    assert_eq!(options.name.as_deref(), Some("sandjob-job-1"));
}

#[rstest]
fn create_failure_is_a_provisioning_error(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    spec: SandboxSpec,
) -> std::io::Result<()> {
    let rt = runtime?;
    let mut engine = MockRuntime::new();
    engine
        .expect_create()
        .returning(|_, _| Box::pin(async { Err(engine_error("image not found")) }));

    let error = rt
        .block_on(Sandbox::create(&engine, &spec))
        .expect_err("create should fail");

    assert!(matches!(
        error,
        SandjobError::Sandbox(SandboxError::CreateFailed { .. })
    ));
    assert!(error.to_string().contains("image not found"));
    Ok(())
}

#[rstest]
fn waiting_before_start_is_rejected_without_engine_call(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    spec: SandboxSpec,
) -> std::io::Result<()> {
    let rt = runtime?;
    let engine = runtime_creating("sb-1");

    let mut sandbox = rt
        .block_on(Sandbox::create(&engine, &spec))
        .map_err(|error| io_error(error.to_string()))?;
    let error = rt.block_on(sandbox.wait()).expect_err("wait before start");

    assert_eq!(error.to_string(), "sandbox 'sb-1' cannot wait while created");
    assert_eq!(sandbox.state(), SandboxState::Created);
    Ok(())
}

#[rstest]
fn upload_after_start_is_rejected(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    spec: SandboxSpec,
) -> std::io::Result<()> {
    let rt = runtime?;
    let mut engine = runtime_creating("sb-2");
    engine
        .expect_start()
        .returning(|_| Box::pin(async { Ok(()) }));

    let mut sandbox = rt
        .block_on(Sandbox::create(&engine, &spec))
        .map_err(|error| io_error(error.to_string()))?;
    rt.block_on(sandbox.start())
        .map_err(|error| io_error(error.to_string()))?;
    let error = rt
        .block_on(sandbox.put_archive(WORKSPACE_DIR, vec![]))
        .expect_err("upload after start");

    assert!(matches!(
        error,
        SandjobError::Sandbox(SandboxError::InvalidTransition {
            operation: "upload an archive",
            ..
        })
    ));
    Ok(())
}

#[rstest]
fn full_lifecycle_reaches_removed_once(
    runtime: std::io::Result<tokio::runtime::Runtime>,
    spec: SandboxSpec,
) -> std::io::Result<()> {
    let rt = runtime?;
    let uploads = Arc::new(Mutex::new(Vec::<String>::new()));
    let uploads_for_closure = Arc::clone(&uploads);

    let mut engine = runtime_creating("sb-3");
    engine
        .expect_put_archive()
        .times(2)
        .returning(move |_, destination, _| {
            if let Ok(mut locked) = uploads_for_closure.lock() {
                locked.push(String::from(destination));
            }
            Box::pin(async { Ok(()) })
        });
    engine
        .expect_start()
        .times(1)
        .returning(|_| Box::pin(async { Ok(()) }));
    engine.expect_wait().times(1).returning(|_| {
        Box::pin(async {
            Ok(SandboxExit {
                code: 3,
                error_message: None,
            })
        })
    });
    engine
        .expect_remove()
        .times(1)
        .returning(|_| Box::pin(async { Err(engine_error("already gone")) }));

    let mut sandbox = rt
        .block_on(Sandbox::create(&engine, &spec))
        .map_err(|error| io_error(error.to_string()))?;
    rt.block_on(sandbox.put_archive(WORKSPACE_DIR, vec![1]))
        .map_err(|error| io_error(error.to_string()))?;
    rt.block_on(sandbox.put_archive(DATA_DIR, vec![2]))
        .map_err(|error| io_error(error.to_string()))?;
    rt.block_on(sandbox.start())
        .map_err(|error| io_error(error.to_string()))?;
    let exit = rt
        .block_on(sandbox.wait())
        .map_err(|error| io_error(error.to_string()))?;

    assert_eq!(exit.code, 3);
    assert_eq!(sandbox.state(), SandboxState::Exited(3));

    rt.block_on(sandbox.remove());
    rt.block_on(sandbox.remove());

    assert_eq!(sandbox.state(), SandboxState::Removed);
    let recorded = uploads
        .lock()
        .map_err(|_| io_error("upload capture lock poisoned"))?
        .clone();
    assert_eq!(recorded, vec![WORKSPACE_DIR, DATA_DIR]);
    Ok(())
}
