//! Gazebo physics simulator component.

use crate::component::{Component, Environment};
use crate::container::{ContainerComponent, ContainerNode};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use cosim_sandbox::{PortProtocol, SandboxSpec};
use std::collections::BTreeMap;
use std::fmt;

/// Default Gazebo image.
pub const DEFAULT_IMAGE: &str = "ghcr.io/cpslab-asu/multicosim/gazebo:harmonic";

/// World file the generated world is based on.
pub const DEFAULT_TEMPLATE: &str = "resources/world/default.sdf";

/// Where the generated world is written inside the unit.
pub const DEFAULT_WORLD: &str = "/tmp/generated.sdf";

/// Default duration of one simulation step, in seconds.
pub const DEFAULT_STEP_SIZE: f64 = 0.001;

const DEFAULT_ITERATIONS: u32 = 50;

/// ODE dynamics solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OdeSolver {
    /// Iterative projected Gauss-Seidel; accuracy scales with iterations.
    #[default]
    Quick,
    /// Direct Dantzig solver.
    World,
}

/// Dart dynamics solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DartSolver {
    #[default]
    Dantzig,
    Pgs,
}

/// Physics engine used by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Ode { solver: OdeSolver, iterations: u32 },
    Dart { solver: DartSolver },
    Bullet { iterations: u32 },
    Simbody,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Ode {
            solver: OdeSolver::default(),
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl Backend {
    pub fn bullet() -> Self {
        Backend::Bullet {
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn dart() -> Self {
        Backend::Dart {
            solver: DartSolver::default(),
        }
    }

    /// Command line arguments selecting this backend.
    pub fn args(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Ode { solver, iterations } => {
                let solver = match solver {
                    OdeSolver::Quick => "quick",
                    OdeSolver::World => "world",
                };
                write!(f, "ode --solver {solver} --iterations {iterations}")
            }
            Backend::Dart { solver } => {
                let solver = match solver {
                    DartSolver::Dantzig => "dantzig",
                    DartSolver::Pgs => "pgs",
                };
                write!(f, "dart --solver {solver}")
            }
            Backend::Bullet { iterations } => write!(f, "bullet --iterations {iterations}"),
            Backend::Simbody => f.write_str("simbody"),
        }
    }
}

/// Physics settings for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeboConfig {
    pub backend: Backend,
    /// Seconds per step.
    pub step_size: f64,
}

impl Default for GazeboConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            step_size: DEFAULT_STEP_SIZE,
        }
    }
}

/// Gazebo running in its own unit.
#[derive(Debug, Clone)]
pub struct GazeboComponent {
    container: ContainerComponent,
    config: GazeboConfig,
    template: String,
    world: String,
}

impl GazeboComponent {
    /// Create a new component builder.
    pub fn builder() -> GazeboComponentBuilder {
        GazeboComponentBuilder::default()
    }

    pub fn config(&self) -> &GazeboConfig {
        &self.config
    }

    /// World template path inside the image.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Path of the generated world inside the unit.
    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn container(&self) -> &ContainerComponent {
        &self.container
    }
}

#[async_trait]
impl Component<Environment> for GazeboComponent {
    type Node = ContainerNode;

    async fn start(&self, environment: &Environment) -> Result<ContainerNode> {
        tracing::debug!(
            backend = %self.config.backend,
            step_size = self.config.step_size,
            world = %self.world,
            "Starting Gazebo"
        );
        self.container.start(environment).await
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.container.exposed_ports()
    }
}

/// Builder for GazeboComponent.
#[derive(Debug)]
pub struct GazeboComponentBuilder {
    image: String,
    template: String,
    world: String,
    config: GazeboConfig,
    ports: BTreeMap<u16, PortProtocol>,
    remove: bool,
}

impl Default for GazeboComponentBuilder {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            world: DEFAULT_WORLD.to_string(),
            config: GazeboConfig::default(),
            ports: BTreeMap::new(),
            remove: true,
        }
    }
}

impl GazeboComponentBuilder {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// World file to use as the template for the generated world.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Where to write the generated world.
    pub fn world(mut self, world: impl Into<String>) -> Self {
        self.world = world.into();
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn step_size(mut self, step_size: f64) -> Self {
        self.config.step_size = step_size;
        self
    }

    pub fn config(mut self, config: GazeboConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish an extra TCP port from the simulator unit.
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.ports.insert(port, PortProtocol::Tcp);
        self
    }

    pub fn remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    /// Build the component, validating the physics settings.
    pub fn build(self) -> Result<GazeboComponent> {
        if !(self.config.step_size.is_finite() && self.config.step_size > 0.0) {
            return Err(CoreError::Config(format!(
                "step size must be a positive number of seconds, got {}",
                self.config.step_size
            )));
        }
        match self.config.backend {
            Backend::Ode { iterations: 0, .. } | Backend::Bullet { iterations: 0 } => {
                return Err(CoreError::Config("solver iterations must be > 0".into()));
            }
            _ => {}
        }
        if self.template.trim().is_empty() || self.world.trim().is_empty() {
            return Err(CoreError::Config("world paths cannot be empty".into()));
        }

        let command = format!(
            "gazebo --base {} --world {} --step-size {} {}",
            shell_quote(&self.template),
            shell_quote(&self.world),
            self.config.step_size,
            self.config.backend.args()
        );

        let mut spec = SandboxSpec::builder()
            .image(self.image)
            .command(command)
            .remove(self.remove);
        for (port, protocol) in self.ports {
            spec = spec.port(port, protocol);
        }

        Ok(GazeboComponent {
            container: ContainerComponent::new(spec.build()?),
            config: self.config,
            template: self.template,
            world: self.world,
        })
    }
}

fn shell_quote(path: &str) -> String {
    shlex::try_quote(path)
        .map(|quoted| quoted.into_owned())
        .unwrap_or_else(|_| path.to_string())
}
