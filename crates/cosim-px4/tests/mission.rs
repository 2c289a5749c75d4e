//! PX4 missions against the in-memory runtime and a stand-in firmware.

use cosim_core::{CommunicationNode, CosimConfig, Simulation, Simulator};
use cosim_protocol::{ClientConfig, FirmwareServer, DEFAULT_PORT};
use cosim_px4::{
    Configuration, Pose, Px4, Px4Config, Px4Gazebo, State, States, DEFAULT_MISSION,
};
use cosim_sandbox::mock::{MockRuntime, UnitScript};
use cosim_sandbox::{RunStatus, WaitConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn config(remove: bool) -> Px4Config {
    Px4Config {
        cosim: CosimConfig {
            wait: WaitConfig {
                poll_interval: Duration::from_millis(5),
                start_timeout: Duration::from_secs(1),
                port_timeout: Duration::from_secs(1),
                identity_timeout: Duration::from_secs(1),
                stop_grace: Duration::from_secs(1),
                exit_timeout: Duration::from_secs(1),
            },
            client: ClientConfig {
                retry_interval: Duration::from_millis(5),
                liveness_interval: Duration::from_millis(5),
                response_timeout: Duration::from_secs(5),
            },
            remove,
            monitor_firmware: true,
        },
        ..Px4Config::default()
    }
}

/// Stand-in firmware flying one second per waypoint.
async fn fly(configuration: Configuration) -> Result<States, String> {
    if configuration.model != "x500" {
        return Err(format!("unknown model {}", configuration.model));
    }
    Ok(configuration
        .mission
        .iter()
        .enumerate()
        .map(|(i, w)| State {
            time: i as f64,
            pose: Pose { x: w.lat, y: w.lon, z: w.alt },
        })
        .collect())
}

async fn px4(runtime: &Arc<MockRuntime>, config: &Px4Config) -> Px4 {
    let server = FirmwareServer::<Configuration, States>::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();
    tokio::spawn(server.serve_once(fly));

    // Gazebo starts first and publishes the firmware port
    runtime.script_next(UnitScript {
        host_ports: HashMap::from([(DEFAULT_PORT, port)]),
        ..UnitScript::default()
    });

    let gazebo = Px4Gazebo::from_config(config).unwrap();
    Px4::with_config(runtime.clone(), config, gazebo).unwrap()
}

#[tokio::test]
async fn test_default_mission_scenario() {
    let runtime = Arc::new(MockRuntime::new());
    let config = config(false);
    let px4 = px4(&runtime, &config).await;

    let mut simulation = px4.start().await.unwrap();
    let states = simulation
        .firmware()
        .send(&Configuration::new(DEFAULT_MISSION))
        .await
        .unwrap();

    assert_eq!(states.len(), 3);
    assert!(states.is_time_ordered());

    simulation.stop().await.unwrap();
    let launched = runtime.launched();
    assert_eq!(launched.len(), 2);
    for id in &launched {
        assert_eq!(runtime.status_of(id), Some(RunStatus::Exited));
    }

    let images = runtime.pulled_images();
    assert_eq!(
        images,
        vec![
            "ghcr.io/cpslab-asu/multicosim/px4/gazebo:latest".to_string(),
            "ghcr.io/cpslab-asu/multicosim/px4/firmware:latest".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_simulate_cleans_up() {
    let runtime = Arc::new(MockRuntime::new());
    let config = config(true);
    let px4 = px4(&runtime, &config).await;

    let states = px4.simulate(&Configuration::default()).await.unwrap();
    assert_eq!(states.duration(), 2.0);

    for id in runtime.launched() {
        assert!(!runtime.exists(&id));
    }
    assert!(runtime.networks().is_empty());
}

#[tokio::test]
async fn test_firmware_failure_still_stops_units() {
    let runtime = Arc::new(MockRuntime::new());
    let config = config(false);
    let px4 = px4(&runtime, &config).await;

    let mission = Configuration::new(DEFAULT_MISSION).with_model("vtol");
    let err = px4.simulate(&mission).await.unwrap_err();
    assert!(err.to_string().contains("unknown model vtol"), "unexpected error: {err}");

    for id in runtime.launched() {
        assert_eq!(runtime.status_of(&id), Some(RunStatus::Exited));
    }
}

#[tokio::test]
async fn test_empty_mission_starts_nothing() {
    let runtime = Arc::new(MockRuntime::new());
    let config = config(true);
    let px4 = px4(&runtime, &config).await;

    assert!(px4.simulate(&Configuration::new(Vec::new())).await.is_err());
    assert!(runtime.launched().is_empty());
}

#[tokio::test]
async fn test_extra_components_share_the_run() {
    let runtime = Arc::new(MockRuntime::new());
    let config = config(false);
    let mut px4 = px4(&runtime, &config).await;

    let extra = px4.add(cosim_core::ContainerComponent::new(
        cosim_sandbox::SandboxSpec::builder().image("observer").build().unwrap(),
    ));

    let mut simulation = px4.start().await.unwrap();
    assert!(simulation.get(extra).is_some());
    assert!(simulation.get(px4.joint()).is_some());

    simulation.stop().await.unwrap();
    assert_eq!(runtime.launched().len(), 3);
}
