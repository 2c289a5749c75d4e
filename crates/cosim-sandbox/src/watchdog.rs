//! Watchdog for units whose early exit is fatal to the whole simulation.
//!
//! A background task polls the unit's run status. If the unit stops running
//! while nobody asked it to, the task records a [`MonitoredExit`] in a
//! shared slot and ends. Callers pick the failure up with
//! [`Watchdog::check`] or when they [`stop`](Watchdog::stop) the watchdog,
//! so the error reaches the caller's task instead of dying with the monitor.

use crate::error::{Result, SandboxError};
use crate::runtime::{RunStatus, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Record of a unit that exited while being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredExit {
    /// Name of the unit.
    pub name: String,
    /// Status observed when the exit was noticed.
    pub status: RunStatus,
}

impl From<MonitoredExit> for SandboxError {
    fn from(exit: MonitoredExit) -> Self {
        SandboxError::MonitoredExit { name: exit.name }
    }
}

/// Handle to a running watchdog task.
pub struct Watchdog {
    name: String,
    /// Set once a stop was requested; the task must not report after this.
    stop: Arc<AtomicBool>,
    /// Wakes the task out of its poll sleep on stop.
    stop_notify: Arc<Notify>,
    tripped: Arc<Mutex<Option<MonitoredExit>>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start watching the unit `id`.
    pub fn spawn(
        runtime: Arc<dyn Runtime>,
        id: impl Into<String>,
        name: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let tripped = Arc::new(Mutex::new(None));

        let handle = tokio::spawn(Self::watch_loop(
            runtime,
            id,
            name.clone(),
            poll_interval,
            Arc::clone(&stop),
            Arc::clone(&stop_notify),
            Arc::clone(&tripped),
        ));

        tracing::debug!(sandbox = %name, "Watchdog started");
        Self {
            name,
            stop,
            stop_notify,
            tripped,
            handle: Some(handle),
        }
    }

    async fn watch_loop(
        runtime: Arc<dyn Runtime>,
        id: String,
        name: String,
        poll_interval: Duration,
        stop: Arc<AtomicBool>,
        stop_notify: Arc<Notify>,
        tripped: Arc<Mutex<Option<MonitoredExit>>>,
    ) {
        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }

            match runtime.inspect(&id).await {
                Ok(state) if state.status != RunStatus::Running => {
                    // Checked under the slot lock so a concurrent disarm wins.
                    let mut slot = tripped.lock().unwrap_or_else(|e| e.into_inner());
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    // The runtime name may only have appeared after the spawn.
                    let name = state.identity().unwrap_or(name.as_str()).to_string();
                    tracing::error!(sandbox = %name, status = %state.status, "Monitored sandbox exited early");
                    *slot = Some(MonitoredExit {
                        name,
                        status: state.status,
                    });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(sandbox = %name, error = %e, "Watchdog inspection failed");
                }
            }

            tokio::select! {
                biased;
                _ = stop_notify.notified() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::trace!(sandbox = %name, "Watchdog loop exited");
    }

    /// Name of the watched unit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failure recorded so far, without waiting.
    pub fn check(&self) -> Result<()> {
        let slot = self.tripped.lock().unwrap_or_else(|e| e.into_inner());
        match (*slot).clone() {
            Some(exit) => Err(exit.into()),
            None => Ok(()),
        }
    }

    /// Whether the watchdog task is still polling.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop watching without waiting for the task, forgetting any exit
    /// recorded so far.
    ///
    /// For units that have finished their work: from here on an exit is
    /// expected and only the unit's exit code decides whether it was good.
    /// Returns the discarded record, if any.
    pub fn disarm(&self) -> Option<MonitoredExit> {
        let mut slot = self.tripped.lock().unwrap_or_else(|e| e.into_inner());
        self.stop.store(true, Ordering::Release);
        self.stop_notify.notify_one();
        tracing::debug!(sandbox = %self.name, "Watchdog disarmed");
        slot.take()
    }

    /// Stop the watchdog and wait for its task to finish.
    ///
    /// Returns the failure recorded before the stop, if any. Once this
    /// returns the watchdog can no longer fire, so the unit may be shut down.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.stop_notify.notify_one();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(sandbox = %self.name, error = ?e, "Watchdog task panicked");
            }
            tracing::debug!(sandbox = %self.name, "Watchdog stopped");
        }

        self.check()
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SandboxSpec, WaitConfig};
    use crate::mock::{MockRuntime, UnitScript};
    use crate::network::NetworkRef;
    use crate::sandbox::Sandbox;

    async fn start(runtime: &Arc<MockRuntime>) -> Sandbox {
        let spec = SandboxSpec::builder()
            .image("ghcr.io/cpslab-asu/multicosim/px4/firmware")
            .command("firmware --port 5556")
            .build()
            .unwrap();
        Sandbox::start(runtime.clone(), spec, NetworkRef::Default, WaitConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_watchdog_quiet_while_running() {
        let runtime = Arc::new(MockRuntime::new());
        let sandbox = start(&runtime).await;

        let mut watchdog = Watchdog::spawn(
            runtime.clone(),
            sandbox.id(),
            sandbox.name(),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(watchdog.check().is_ok());
        assert!(watchdog.is_running());

        watchdog.stop().await.expect("no early exit recorded");
        assert!(!watchdog.is_running());
    }

    #[tokio::test]
    async fn test_watchdog_records_early_exit() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            exit_after_polls: Some((3, 1)),
            ..Default::default()
        });
        let sandbox = start(&runtime).await;

        let mut watchdog = Watchdog::spawn(
            runtime.clone(),
            sandbox.id(),
            sandbox.name(),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = watchdog.check().unwrap_err();
        assert!(matches!(err, SandboxError::MonitoredExit { .. }));
        assert!(watchdog.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_early_exit_reports_runtime_name() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.script_next(UnitScript {
            name_delay_polls: 2,
            exit_after_polls: Some((3, 1)),
            ..Default::default()
        });
        let sandbox = start(&runtime).await;
        // Spawned while only the short id is known
        assert_eq!(sandbox.name(), &sandbox.id()[..12]);

        let mut watchdog = Watchdog::spawn(
            runtime.clone(),
            sandbox.id(),
            sandbox.name(),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let expected = runtime.name_of(sandbox.id()).unwrap();
        match watchdog.stop().await.unwrap_err() {
            SandboxError::MonitoredExit { name } => assert_eq!(name, expected),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_disarmed_watchdog_ignores_exit() {
        let runtime = Arc::new(MockRuntime::new());
        let sandbox = start(&runtime).await;

        let mut watchdog = Watchdog::spawn(
            runtime.clone(),
            sandbox.id(),
            sandbox.name(),
            Duration::from_millis(1),
        );
        assert!(watchdog.disarm().is_none());
        runtime.exit(sandbox.id(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(watchdog.check().is_ok());
        watchdog.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disarm_discards_recorded_exit() {
        let runtime = Arc::new(MockRuntime::new());
        let sandbox = start(&runtime).await;

        let watchdog = Watchdog::spawn(
            runtime.clone(),
            sandbox.id(),
            sandbox.name(),
            Duration::from_millis(1),
        );
        runtime.exit(sandbox.id(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(watchdog.check().is_err());

        let discarded = watchdog.disarm().unwrap();
        assert_eq!(discarded.status, RunStatus::Exited);
        assert!(watchdog.check().is_ok());
    }

    #[tokio::test]
    async fn test_intentional_stop_does_not_fire() {
        let runtime = Arc::new(MockRuntime::new());
        let mut sandbox = start(&runtime).await;

        let mut watchdog = Watchdog::spawn(
            runtime.clone(),
            sandbox.id(),
            sandbox.name(),
            Duration::from_millis(1),
        );
        watchdog.stop().await.unwrap();
        sandbox.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(watchdog.check().is_ok());
    }
}
