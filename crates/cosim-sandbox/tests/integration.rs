//! Integration tests for cosim-sandbox against a real Docker daemon.
//!
//! These tests require:
//! - A reachable Docker daemon (`DOCKER_HOST` or the local socket)
//! - Network access to pull `alpine:3.20` on first run
//!
//! Run with: `cargo test -p cosim-sandbox -- --ignored`

use cosim_sandbox::{
    DockerRuntime, Network, NetworkHost, NetworkRef, PortProtocol, Runtime, Sandbox,
    SandboxError, SandboxSpec, WaitConfig, Watchdog,
};
use std::sync::Arc;
use std::time::Duration;

const IMAGE: &str = "alpine:3.20";

fn runtime() -> Arc<DockerRuntime> {
    Arc::new(DockerRuntime::connect().expect("Docker daemon not reachable"))
}

/// Full lifecycle: start -> running -> stop -> removed
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sandbox_lifecycle() {
    let runtime = runtime();
    let spec = SandboxSpec::builder()
        .image(IMAGE)
        .command("sleep 300")
        .build()
        .unwrap();

    let mut sandbox = Sandbox::start(runtime.clone(), spec, NetworkRef::Default, WaitConfig::default())
        .await
        .expect("Failed to start sandbox");
    assert!(!sandbox.has_exited().await.unwrap());
    assert!(!sandbox.identity().await.unwrap().is_empty());

    let exit = sandbox.stop().await.expect("stop requested by us is a good exit");
    assert!(exit.is_good());
    assert!(exit.stop_requested);

    let err = runtime.inspect(sandbox.id()).await.unwrap_err();
    assert!(matches!(err, SandboxError::NotFound(_)));
}

/// A unit that fails on its own is kept for inspection
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_abnormal_exit_is_reported() {
    let runtime = runtime();
    let spec = SandboxSpec::builder()
        .image(IMAGE)
        .command("sh -c 'exit 3'")
        .build()
        .unwrap();

    let mut sandbox = Sandbox::start(runtime.clone(), spec, NetworkRef::Default, WaitConfig::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let err = sandbox.stop().await.unwrap_err();
    assert!(matches!(err, SandboxError::AbnormalExit { code: 3, .. }));

    // Preserved unit: clean up manually
    runtime.remove(sandbox.id()).await.unwrap();
}

/// Published port resolves through the namespace owner
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_shared_namespace_ports() {
    let runtime = runtime();
    let mut network = Network::create(runtime.clone()).await.unwrap();

    let owner_spec = SandboxSpec::builder()
        .image(IMAGE)
        .command("sleep 300")
        .tcp_port(5556)
        .build()
        .unwrap();
    let mut owner = Sandbox::start(runtime.clone(), owner_spec, network.reference(), WaitConfig::default())
        .await
        .unwrap();

    let guest_spec = SandboxSpec::builder()
        .image(IMAGE)
        .command("sleep 300")
        .tcp_port(5556)
        .build()
        .unwrap();
    let joined = owner.network_identity().await.unwrap();
    let mut guest = Sandbox::start(runtime.clone(), guest_spec, joined, WaitConfig::default())
        .await
        .unwrap();

    let owner_port = owner.host_port(5556, PortProtocol::Tcp).await.unwrap();
    let guest_port = guest.host_port(5556, PortProtocol::Tcp).await.unwrap();
    assert_eq!(owner_port, guest_port);

    guest.stop().await.unwrap();
    owner.stop().await.unwrap();
    network.remove().await.unwrap();
}

/// Watchdog notices a unit that dies early
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_watchdog_detects_exit() {
    let runtime = runtime();
    let spec = SandboxSpec::builder()
        .image(IMAGE)
        .command("sh -c 'sleep 1; exit 1'")
        .build()
        .unwrap();

    let mut sandbox = Sandbox::start(runtime.clone(), spec, NetworkRef::Default, WaitConfig::default())
        .await
        .unwrap();
    let mut watchdog = Watchdog::spawn(
        runtime.clone(),
        sandbox.id(),
        sandbox.name(),
        Duration::from_millis(100),
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(
        watchdog.stop().await,
        Err(SandboxError::MonitoredExit { .. })
    ));

    assert!(sandbox.stop().await.is_err());
    runtime.remove(sandbox.id()).await.unwrap();
}
