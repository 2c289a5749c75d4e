//! In-memory runtime for tests.
//!
//! `MockRuntime` keeps units in a map and reproduces the runtime behaviours
//! the orchestrator has to cope with: ports and names that show up a few
//! polls late, units that ignore stop requests, images that cannot be
//! pulled, and units that exit on their own.

use crate::error::{Result, SandboxError};
use crate::image::ImageRef;
use crate::network::NetworkRef;
use crate::runtime::{LaunchSpec, PortBinding, RunStatus, Runtime, UnitState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// First host port handed out by the mock.
const FIRST_HOST_PORT: u16 = 32768;

/// Behaviour of the next launched unit.
#[derive(Debug, Clone)]
pub struct UnitScript {
    /// Publish declared ports at all.
    pub publish_ports: bool,
    /// Number of inspections before ports show up.
    pub port_delay_polls: u32,
    /// Number of inspections before the unit has a name.
    pub name_delay_polls: u32,
    /// Never leave the `created` state.
    pub stuck_in_created: bool,
    /// Ignore graceful stop requests; only `kill` ends the unit.
    pub ignore_stop: bool,
    /// Exit with `code` after this many inspections.
    pub exit_after_polls: Option<(u32, i64)>,
    /// Fixed host ports by container port; others get the next free mock port.
    pub host_ports: HashMap<u16, u16>,
}

impl Default for UnitScript {
    fn default() -> Self {
        Self {
            publish_ports: true,
            port_delay_polls: 0,
            name_delay_polls: 0,
            stuck_in_created: false,
            ignore_stop: false,
            exit_after_polls: None,
            host_ports: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Unit {
    name: String,
    spec: LaunchSpec,
    status: RunStatus,
    exit_code: Option<i64>,
    ports: HashMap<String, Vec<PortBinding>>,
    script: UnitScript,
    inspections: u32,
    stop_requests: u32,
    kill_requests: u32,
}

impl Unit {
    fn terminate(&mut self, code: i64) {
        if !self.status.is_terminal() {
            self.status = RunStatus::Exited;
            self.exit_code = Some(code);
        }
    }

    fn snapshot(&mut self) -> UnitState {
        self.inspections += 1;

        if let Some((polls, code)) = self.script.exit_after_polls {
            if self.inspections > polls {
                self.terminate(code);
            }
        }

        let name = (self.inspections > self.script.name_delay_polls)
            .then(|| format!("/{}", self.name));
        let ports = if self.script.publish_ports && self.inspections > self.script.port_delay_polls
        {
            self.ports.clone()
        } else {
            self.ports.keys().map(|k| (k.clone(), Vec::new())).collect()
        };

        UnitState {
            name,
            status: self.status,
            exit_code: self.exit_code,
            ports,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    units: HashMap<String, Unit>,
    names: HashMap<String, String>,
    scripts: VecDeque<UnitScript>,
    forbidden_images: HashSet<String>,
    pulled_images: Vec<String>,
    networks: HashSet<String>,
    network_removals: usize,
    launches: Vec<String>,
    total_kills: u32,
    next_unit: u64,
    next_port: u16,
}

impl Inner {
    fn resolve(&self, key: &str) -> Option<String> {
        if self.units.contains_key(key) {
            return Some(key.to_string());
        }
        self.names.get(key.trim_start_matches('/')).cloned()
    }

    fn unit_mut(&mut self, key: &str) -> Result<&mut Unit> {
        let id = self
            .resolve(key)
            .ok_or_else(|| SandboxError::NotFound(key.to_string()))?;
        self.units
            .get_mut(&id)
            .ok_or_else(|| SandboxError::NotFound(key.to_string()))
    }
}

/// In-memory [`Runtime`].
#[derive(Debug, Default)]
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `script` to the next launched unit. Scripts queue up in order.
    pub fn script_next(&self, script: UnitScript) {
        self.lock().scripts.push_back(script);
    }

    /// Make `reference` unresolvable.
    pub fn forbid_image(&self, reference: &str) {
        self.lock().forbidden_images.insert(reference.to_string());
    }

    /// Images pulled so far, in order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.lock().pulled_images.clone()
    }

    /// Make the unit exit on its own with `code`.
    pub fn exit(&self, id: &str, code: i64) {
        if let Ok(unit) = self.lock().unit_mut(id) {
            unit.terminate(code);
        }
    }

    /// Whether the unit still exists (has not been removed).
    pub fn exists(&self, id: &str) -> bool {
        self.lock().resolve(id).is_some()
    }

    /// Current status of a unit, if it exists.
    pub fn status_of(&self, id: &str) -> Option<RunStatus> {
        self.lock().unit_mut(id).ok().map(|u| u.status)
    }

    /// Ids of all launched units, in launch order, including removed ones.
    pub fn launched(&self) -> Vec<String> {
        self.lock().launches.clone()
    }

    /// Launch spec of a unit.
    pub fn launch_spec(&self, id: &str) -> Option<LaunchSpec> {
        self.lock().unit_mut(id).ok().map(|u| u.spec.clone())
    }

    /// Runtime name of a unit.
    pub fn name_of(&self, id: &str) -> Option<String> {
        self.lock().unit_mut(id).ok().map(|u| u.name.clone())
    }

    pub fn stop_requests(&self, id: &str) -> u32 {
        self.lock().unit_mut(id).map(|u| u.stop_requests).unwrap_or(0)
    }

    pub fn kill_requests(&self, id: &str) -> u32 {
        self.lock().unit_mut(id).map(|u| u.kill_requests).unwrap_or(0)
    }

    pub fn total_kill_requests(&self) -> u32 {
        self.lock().total_kills
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.lock().networks.contains(name)
    }

    pub fn networks(&self) -> Vec<String> {
        self.lock().networks.iter().cloned().collect()
    }

    pub fn network_removals(&self) -> usize {
        self.lock().network_removals
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn ensure_image(&self, image: &ImageRef) -> Result<()> {
        let mut inner = self.lock();
        let reference = image.to_string();
        if inner.forbidden_images.contains(&reference) {
            return Err(SandboxError::ImageResolution {
                image: reference,
                reason: "manifest unknown".into(),
            });
        }
        if !inner.pulled_images.contains(&reference) {
            inner.pulled_images.push(reference);
        }
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String> {
        let mut inner = self.lock();

        match &spec.network {
            NetworkRef::Named(name) if !inner.networks.contains(name) => {
                return Err(SandboxError::Runtime(format!("network {name} not found")));
            }
            NetworkRef::Container(owner) => {
                let owner_unit = inner.unit_mut(owner)?;
                if owner_unit.status != RunStatus::Running {
                    return Err(SandboxError::Runtime(format!(
                        "cannot join container {owner}: it is not running"
                    )));
                }
            }
            _ => {}
        }

        inner.next_unit += 1;
        let n = inner.next_unit;
        let id = format!("{n:0>12}-mock-unit");
        let name = format!("unit-{n}");
        let script = inner.scripts.pop_front().unwrap_or_default();

        let mut ports = HashMap::new();
        if !spec.network.is_shared_namespace() {
            for (port, protocol) in &spec.ports {
                let host_port = match script.host_ports.get(port) {
                    Some(fixed) => *fixed,
                    None => {
                        inner.next_port += 1;
                        FIRST_HOST_PORT + inner.next_port - 1
                    }
                };
                ports.insert(
                    protocol.port_key(*port),
                    vec![PortBinding {
                        host_ip: Some("0.0.0.0".into()),
                        host_port: Some(host_port.to_string()),
                    }],
                );
            }
        }

        let status = if script.stuck_in_created {
            RunStatus::Created
        } else {
            RunStatus::Running
        };

        inner.units.insert(
            id.clone(),
            Unit {
                name: name.clone(),
                spec: spec.clone(),
                status,
                exit_code: None,
                ports,
                script,
                inspections: 0,
                stop_requests: 0,
                kill_requests: 0,
            },
        );
        inner.names.insert(name, id.clone());
        inner.launches.push(id.clone());
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<UnitState> {
        Ok(self.lock().unit_mut(id)?.snapshot())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut inner = self.lock();
        let unit = inner.unit_mut(id)?;
        unit.stop_requests += 1;
        if !unit.script.ignore_stop {
            unit.terminate(137);
        }
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.total_kills += 1;
        let unit = inner.unit_mut(id)?;
        unit.kill_requests += 1;
        unit.terminate(137);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let unit = inner.unit_mut(id)?;
        if !unit.status.is_terminal() {
            return Err(SandboxError::Runtime(format!(
                "cannot remove running unit {id}"
            )));
        }
        let name = unit.name.clone();
        if let Some(real_id) = inner.names.remove(&name) {
            inner.units.remove(&real_id);
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.networks.insert(name.to_string()) {
            return Err(SandboxError::Runtime(format!("network {name} already exists")));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.networks.remove(name) {
            return Err(SandboxError::NotFound(name.to_string()));
        }
        inner.network_removals += 1;
        Ok(())
    }
}
