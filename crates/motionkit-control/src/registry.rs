//! Controller type registry
//!
//! Maps controller kind names to factories. The registry is constructed
//! explicitly and passed to whoever builds controllers: the graph builder and
//! digital-twin cloning.

use crate::controller::{
    Controller, LinkedPositioner, SimulatedPositioner, SimulatedShutter, VirtualPositioner,
    VirtualShutter,
};
use crate::device::Capability;
use crate::master::MasterController;
use crate::transport::{LoopbackTransport, Transport};
use motionkit_core::{ConfigurationError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds a controller with the given name
pub type ControllerFactory = Arc<dyn Fn(&str) -> Arc<dyn Controller> + Send + Sync>;

/// Builds the transport of a hardware-linked controller
pub type TransportFactory = Arc<dyn Fn(&str) -> Arc<dyn Transport> + Send + Sync>;

/// Timing parameters handed to the built-in controller kinds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerOptions {
    /// Sampling interval of simulated motions
    pub simulation_tick: Duration,
    /// I/O timeout of hardware-linked controllers
    pub io_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            simulation_tick: Duration::from_millis(10),
            io_timeout: Duration::from_millis(500),
        }
    }
}

/// Kind name to factory map
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    factories: BTreeMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind; linked positioners use loopback
    /// transports
    pub fn builtin(options: ControllerOptions) -> Self {
        Self::builtin_with_transport(
            options,
            Arc::new(|_: &str| Arc::new(LoopbackTransport::new()) as Arc<dyn Transport>),
        )
    }

    /// Registry with every built-in kind and a custom transport factory
    pub fn builtin_with_transport(options: ControllerOptions, transports: TransportFactory) -> Self {
        let mut registry = Self::new();
        let tick = options.simulation_tick;
        let io_timeout = options.io_timeout;

        registry.register(SimulatedPositioner::KIND, move |name| {
            Arc::new(SimulatedPositioner::new(name, tick))
        });
        registry.register(VirtualPositioner::KIND, |name| {
            Arc::new(VirtualPositioner::new(name))
        });
        registry.register(SimulatedShutter::KIND, |name| {
            Arc::new(SimulatedShutter::new(name))
        });
        registry.register(VirtualShutter::KIND, |name| Arc::new(VirtualShutter::new(name)));
        registry.register(LinkedPositioner::KIND, move |name| {
            Arc::new(LinkedPositioner::new(name, transports(name), io_timeout))
        });
        registry.register(MasterController::KIND, |name| {
            Arc::new(MasterController::new(name))
        });
        registry
    }

    /// Register or replace a factory
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&str) -> Arc<dyn Controller> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    /// Whether `kind` has a factory
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds in name order
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a controller of `kind`
    pub fn create(&self, kind: &str, name: &str) -> Result<Arc<dyn Controller>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            ConfigurationError::UnknownControllerKind {
                kind: kind.to_string(),
            }
        })?;
        let controller = factory(name);
        if controller.kind() != kind {
            tracing::debug!(
                "Factory for {} built a {} controller",
                kind,
                controller.kind()
            );
        }
        Ok(controller)
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Capability to controller kind substitutions for digital twins
///
/// Controllers whose capability has no rule keep their own kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionRules {
    rules: BTreeMap<Capability, String>,
}

impl SubstitutionRules {
    /// No substitutions
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace positioners and shutters with their instantaneous virtual
    /// counterparts
    pub fn virtual_twin() -> Self {
        Self::new()
            .substitute(Capability::Positioner, VirtualPositioner::KIND)
            .substitute(Capability::Shutter, VirtualShutter::KIND)
    }

    /// Add a substitution
    pub fn substitute(mut self, capability: Capability, kind: &str) -> Self {
        self.rules.insert(capability, kind.to_string());
        self
    }

    /// Kind to build for a controller of `capability` currently of `kind`
    pub fn kind_for<'a>(&'a self, capability: Capability, kind: &'a str) -> &'a str {
        self.rules.get(&capability).map(String::as_str).unwrap_or(kind)
    }
}
