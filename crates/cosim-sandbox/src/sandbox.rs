//! Sandbox type - one running unit managed through a [`Runtime`].

use crate::config::{SandboxSpec, WaitConfig};
use crate::error::{Result, SandboxError};
use crate::network::{NetworkHost, NetworkRef};
use crate::runtime::{PortProtocol, RunStatus, Runtime, UnitState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exit codes produced by the signals our own stop sequence sends
/// (SIGKILL = 128 + 9, SIGTERM = 128 + 15).
pub const STOP_SIGNAL_EXIT_CODES: [i64; 2] = [137, 143];

/// Terminal exit of a sandbox together with how it came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code reported by the runtime.
    pub code: i64,
    /// Whether this process asked the unit to stop.
    pub stop_requested: bool,
}

impl ExitStatus {
    /// A good exit is a clean `0`, or a signal exit that we caused ourselves.
    pub fn is_good(&self) -> bool {
        self.code == 0 || (self.stop_requested && STOP_SIGNAL_EXIT_CODES.contains(&self.code))
    }
}

/// A started unit.
///
/// Dropping a `Sandbox` does not stop it; call [`stop`](Self::stop).
pub struct Sandbox {
    id: String,
    name: String,
    spec: SandboxSpec,
    network: NetworkRef,
    runtime: Arc<dyn Runtime>,
    wait: WaitConfig,
    started_at: DateTime<Utc>,
    exit: Option<ExitStatus>,
}

impl Sandbox {
    /// Start a unit and wait until the runtime has moved it out of `created`.
    ///
    /// This will:
    /// 1. Resolve the image, pulling it if absent
    /// 2. Create and start the unit on `network`
    /// 3. Poll until the unit is no longer in the `created` state
    ///
    /// It does not wait for the application inside to be ready.
    pub async fn start(
        runtime: Arc<dyn Runtime>,
        spec: SandboxSpec,
        network: NetworkRef,
        wait: WaitConfig,
    ) -> Result<Self> {
        let start = Instant::now();
        tracing::info!(
            image = %spec.image,
            network = %network,
            ports = spec.ports.len(),
            "Starting sandbox"
        );

        runtime.ensure_image(&spec.image).await?;

        let id = runtime.launch(&spec.launch_spec(&network)).await?;
        tracing::debug!(sandbox = %short_id(&id), "Sandbox launched");

        let mut sandbox = Self {
            name: short_id(&id).to_string(),
            id,
            spec,
            network,
            runtime,
            wait,
            started_at: Utc::now(),
            exit: None,
        };

        let started = sandbox
            .poll_until("sandbox to leave the created state", sandbox.wait.start_timeout, |state| {
                (state.status != RunStatus::Created).then_some(())
            })
            .await;

        if let Err(e) = started {
            tracing::error!(sandbox = %sandbox.name, error = %e, "Sandbox did not start, killing it");
            if let Err(kill_err) = sandbox.runtime.kill(&sandbox.id).await {
                tracing::warn!(sandbox = %sandbox.name, error = %kill_err, "Failed to kill sandbox");
            }
            return Err(e);
        }

        tracing::info!(
            sandbox = %sandbox.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox started"
        );
        Ok(sandbox)
    }

    /// Runtime id of the unit.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Best known human readable name (runtime name once seen, short id before).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Specification the unit was started from.
    pub fn spec(&self) -> &SandboxSpec {
        &self.spec
    }

    /// Network the unit was attached to.
    pub fn network(&self) -> &NetworkRef {
        &self.network
    }

    /// Runtime this unit belongs to.
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Wait settings used by this unit.
    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    /// Time the runtime accepted the unit.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Classification of the exit, once [`stop`](Self::stop) has run.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Current run status.
    pub async fn status(&self) -> Result<RunStatus> {
        Ok(self.runtime.inspect(&self.id).await?.status)
    }

    /// Whether the unit has reached a terminal state.
    pub async fn has_exited(&self) -> Result<bool> {
        Ok(self.status().await?.is_terminal())
    }

    /// Host port bound to a declared container port.
    ///
    /// Polls the runtime's port table until the port has a numeric host
    /// binding. Units sharing another unit's namespace are published through
    /// that unit, so its table is consulted instead.
    pub async fn host_port(&self, port: u16, protocol: PortProtocol) -> Result<u16> {
        let target = match &self.network {
            NetworkRef::Container(owner) => owner.clone(),
            _ => self.id.clone(),
        };
        tracing::debug!(sandbox = %self.name, target = %target, port, %protocol, "Resolving host port");

        let start = Instant::now();
        let deadline = self.wait.port_timeout;
        loop {
            let state = self.runtime.inspect(&target).await?;
            if let Some(host_port) = state.host_port(port, protocol) {
                tracing::debug!(
                    sandbox = %self.name,
                    port,
                    host_port,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Host port resolved"
                );
                return Ok(host_port);
            }
            if start.elapsed() >= deadline {
                return Err(SandboxError::timeout(
                    format!("host binding of {} on {}", protocol.port_key(port), self.name),
                    deadline,
                ));
            }
            tokio::time::sleep(self.wait.poll_interval).await;
        }
    }

    /// Wait until the runtime reports a non-empty name for the unit.
    pub async fn identity(&self) -> Result<String> {
        self.poll_until("sandbox name", self.wait.identity_timeout, |state| {
            state.identity().map(str::to_string)
        })
        .await
    }

    /// Stop the unit and classify its exit.
    ///
    /// Requests a graceful stop, kills the unit if it is still alive after the
    /// exit deadline, then classifies the exit code. Only a good exit removes
    /// the unit (when the spec asks for it); after an abnormal exit the unit
    /// is left in place for inspection and [`SandboxError::AbnormalExit`] is
    /// returned.
    ///
    /// Calling this again returns the first classification without touching
    /// the runtime.
    pub async fn stop(&mut self) -> Result<ExitStatus> {
        if let Some(exit) = self.exit {
            return self.classify(exit);
        }

        let start = Instant::now();
        tracing::info!(sandbox = %self.name, "Stopping sandbox");

        let mut state = self.runtime.inspect(&self.id).await?;
        self.remember_name(&state);
        let mut stop_requested = false;

        if !state.status.is_terminal() {
            stop_requested = true;
            tracing::debug!(sandbox = %self.name, grace_secs = self.wait.stop_grace.as_secs(), "Requesting stop");
            if let Err(e) = self.runtime.stop(&self.id, self.wait.stop_grace).await {
                tracing::warn!(sandbox = %self.name, error = %e, "Stop request failed, killing");
            }

            state = match self.wait_terminal().await {
                Ok(state) => state,
                Err(_) => {
                    tracing::warn!(sandbox = %self.name, "Sandbox ignored stop request, killing");
                    if let Err(e) = self.runtime.kill(&self.id).await {
                        tracing::warn!(sandbox = %self.name, error = %e, "Kill request failed");
                    }
                    self.wait_terminal().await?
                }
            };
        }

        let exit = ExitStatus {
            code: state.exit_code.unwrap_or(-1),
            stop_requested,
        };
        self.exit = Some(exit);

        tracing::debug!(
            sandbox = %self.name,
            code = exit.code,
            stop_requested,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox reached terminal state"
        );

        if exit.is_good() && self.spec.remove {
            tracing::debug!(sandbox = %self.name, "Removing sandbox");
            self.runtime.remove(&self.id).await?;
        }

        self.classify(exit)
    }

    fn classify(&self, exit: ExitStatus) -> Result<ExitStatus> {
        if exit.is_good() {
            tracing::info!(sandbox = %self.name, code = exit.code, "Sandbox stopped");
            Ok(exit)
        } else {
            tracing::warn!(
                sandbox = %self.name,
                code = exit.code,
                "Sandbox exited abnormally, keeping it for inspection"
            );
            Err(SandboxError::AbnormalExit {
                name: self.name.clone(),
                code: exit.code,
            })
        }
    }

    async fn wait_terminal(&mut self) -> Result<UnitState> {
        let start = Instant::now();
        loop {
            let state = self.runtime.inspect(&self.id).await?;
            if state.status.is_terminal() {
                return Ok(state);
            }
            if start.elapsed() >= self.wait.exit_timeout {
                return Err(SandboxError::timeout(
                    format!("{} to exit", self.name),
                    self.wait.exit_timeout,
                ));
            }
            tokio::time::sleep(self.wait.poll_interval).await;
        }
    }

    /// Poll the unit's state until `check` yields a value or `deadline` passes.
    async fn poll_until<T>(
        &self,
        what: &str,
        deadline: Duration,
        check: impl Fn(&UnitState) -> Option<T>,
    ) -> Result<T> {
        let start = Instant::now();
        loop {
            let state = self.runtime.inspect(&self.id).await?;
            if let Some(value) = check(&state) {
                return Ok(value);
            }
            if start.elapsed() >= deadline {
                return Err(SandboxError::timeout(what, deadline));
            }
            tracing::trace!(sandbox = %self.name, status = %state.status, "Waiting for {}", what);
            tokio::time::sleep(self.wait.poll_interval).await;
        }
    }

    fn remember_name(&mut self, state: &UnitState) {
        if let Some(name) = state.identity() {
            if name != self.name {
                self.name = name.to_string();
            }
        }
    }
}

#[async_trait]
impl NetworkHost for Sandbox {
    /// The unit's namespace, once it has a name.
    ///
    /// Only a running unit can be joined. A unit that already exited is
    /// reported as [`SandboxError::AbnormalExit`] with its exit code.
    async fn network_identity(&self) -> Result<NetworkRef> {
        let name = self.identity().await?;
        let state = self.runtime.inspect(&self.id).await?;
        if state.status.is_terminal() {
            let code = state.exit_code.unwrap_or(-1);
            tracing::error!(sandbox = %name, code, "Namespace owner exited before it could be joined");
            return Err(SandboxError::AbnormalExit { name, code });
        }
        Ok(NetworkRef::Container(name))
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.spec.image)
            .field("network", &self.network)
            .field("exit", &self.exit)
            .finish()
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRuntime, UnitScript};

    fn wait() -> WaitConfig {
        WaitConfig::builder()
            .poll_interval(Duration::from_millis(1))
            .port_timeout(Duration::from_millis(200))
            .identity_timeout(Duration::from_millis(200))
            .exit_timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    fn spec(remove: bool) -> SandboxSpec {
        SandboxSpec::builder()
            .image("alpine:3.20")
            .command("sleep infinity")
            .tcp_port(5556)
            .remove(remove)
            .build()
            .unwrap()
    }

    async fn start(runtime: &Arc<MockRuntime>, remove: bool) -> Sandbox {
        Sandbox::start(runtime.clone(), spec(remove), NetworkRef::Default, wait())
            .await
            .expect("sandbox should start")
    }

    #[test]
    fn test_exit_classification() {
        let clean = ExitStatus { code: 0, stop_requested: false };
        assert!(clean.is_good());

        let killed_by_us = ExitStatus { code: 137, stop_requested: true };
        assert!(killed_by_us.is_good());

        let killed_elsewhere = ExitStatus { code: 137, stop_requested: false };
        assert!(!killed_elsewhere.is_good());

        let crashed = ExitStatus { code: 1, stop_requested: true };
        assert!(!crashed.is_good());
    }

    #[tokio::test]
    async fn test_start_then_stop_is_good_exit() {
        let runtime = Arc::new(MockRuntime::new());
        let mut sandbox = start(&runtime, true).await;
        assert_eq!(sandbox.status().await.unwrap(), RunStatus::Running);

        let exit = sandbox.stop().await.expect("stop should succeed");
        assert_eq!(exit.code, 137);
        assert!(exit.stop_requested);
        assert!(!runtime.exists(sandbox.id()));
    }

    #[tokio::test]
    async fn test_clean_exit_before_stop_is_removed() {
        let runtime = Arc::new(MockRuntime::new());
        let mut sandbox = start(&runtime, true).await;
        runtime.exit(sandbox.id(), 0);

        let exit = sandbox.stop().await.unwrap();
        assert_eq!(exit, ExitStatus { code: 0, stop_requested: false });
        assert!(!runtime.exists(sandbox.id()));
    }

    #[tokio::test]
    async fn test_abnormal_exit_preserves_unit() {
        let runtime = Arc::new(MockRuntime::new());
        let mut sandbox = start(&runtime, true).await;
        runtime.exit(sandbox.id(), 3);

        let err = sandbox.stop().await.unwrap_err();
        assert!(matches!(err, SandboxError::AbnormalExit { code: 3, .. }));
        assert!(runtime.exists(sandbox.id()));
    }

    #[tokio::test]
    async fn test_foreign_kill_is_abnormal() {
        let runtime = Arc::new(MockRuntime::new());
        let mut sandbox = start(&runtime, true).await;
        runtime.exit(sandbox.id(), 137);

        let err = sandbox.stop().await.unwrap_err();
        assert!(matches!(err, SandboxError::AbnormalExit { code: 137, .. }));
        assert!(runtime.exists(sandbox.id()));
    }

    #[tokio::test]
    async fn test_stop_twice_touches_runtime_once() {
        let runtime = Arc::new(MockRuntime::new());
        let mut sandbox = start(&runtime, false).await;

        sandbox.stop().await.unwrap();
        sandbox.stop().await.unwrap();
        assert_eq!(runtime.stop_requests(sandbox.id()), 1);
        assert!(runtime.exists(sandbox.id()));
    }

    #[tokio::test]
    async fn test_stubborn_unit_is_killed() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            ignore_stop: true,
            ..Default::default()
        });
        let mut sandbox = start(&runtime, false).await;

        let exit = sandbox.stop().await.unwrap();
        assert_eq!(exit.code, 137);
        assert_eq!(runtime.kill_requests(sandbox.id()), 1);
    }

    #[tokio::test]
    async fn test_host_port_after_delayed_publication() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            port_delay_polls: 3,
            ..Default::default()
        });
        let sandbox = start(&runtime, false).await;

        let port = sandbox.host_port(5556, PortProtocol::Tcp).await.unwrap();
        assert!(port >= 32768);
    }

    #[tokio::test]
    async fn test_host_port_never_published_times_out() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            publish_ports: false,
            ..Default::default()
        });
        let mut sandbox = start(&runtime, true).await;

        let err = sandbox.host_port(5556, PortProtocol::Tcp).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));

        // The unit is still stoppable after the aborted wait.
        sandbox.stop().await.expect("stop should still succeed");
    }

    #[tokio::test]
    async fn test_identity_after_delayed_name() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            name_delay_polls: 2,
            ..Default::default()
        });
        let sandbox = start(&runtime, false).await;

        let identity = sandbox.network_identity().await.unwrap();
        assert!(matches!(identity, NetworkRef::Container(ref name) if !name.is_empty()));
    }

    #[tokio::test]
    async fn test_exited_unit_cannot_be_joined() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            exit_after_polls: Some((1, 2)),
            ..Default::default()
        });
        let sandbox = start(&runtime, false).await;

        let err = sandbox.network_identity().await.unwrap_err();
        match err {
            SandboxError::AbnormalExit { name, code } => {
                assert_eq!(name, runtime.name_of(sandbox.id()).unwrap());
                assert_eq!(code, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_image_fails_start() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.forbid_image("alpine:3.20");

        let err = Sandbox::start(runtime.clone(), spec(false), NetworkRef::Default, wait())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImageResolution { .. }));
    }

    #[tokio::test]
    async fn test_start_timeout_kills_unit() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            stuck_in_created: true,
            ..Default::default()
        });
        let wait = WaitConfig::builder()
            .poll_interval(Duration::from_millis(1))
            .start_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let err = Sandbox::start(runtime.clone(), spec(false), NetworkRef::Default, wait)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert_eq!(runtime.total_kill_requests(), 1);
    }
}
