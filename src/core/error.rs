use std::fmt;
use std::io;

use thiserror::Error;

/// Simulation component that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Model,
    Connectivity,
    Coupling,
    Integrator,
    Noise,
    Monitor,
    Stimulus,
    Surface,
    Simulator,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Model => "Model",
            Component::Connectivity => "Connectivity",
            Component::Coupling => "Coupling",
            Component::Integrator => "Integrator",
            Component::Noise => "Noise",
            Component::Monitor => "Monitor",
            Component::Stimulus => "Stimulus",
            Component::Surface => "Surface",
            Component::Simulator => "Simulator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    /// Shape or parameter mismatch detected while wiring components together.
    #[error("{component} configuration error: {message}")]
    Configuration { component: Component, message: String },

    /// A non-finite value appeared in the state vector after an integration step.
    #[error(
        "numerical instability at step {step}: state variable {variable}, node {node}, mode {mode} is not finite"
    )]
    Unstable {
        step: u64,
        variable: usize,
        node: usize,
        mode: usize,
    },

    #[error("simulator is not configured; call configure() first")]
    NotConfigured,

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[cfg(feature = "serde")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn config(component: Component, message: impl Into<String>) -> Self {
        SimError::Configuration {
            component,
            message: message.into(),
        }
    }

    /// Component responsible for a configuration error, if any.
    pub fn component(&self) -> Option<Component> {
        match self {
            SimError::Configuration { component, .. } => Some(*component),
            SimError::Unstable { .. } => Some(Component::Model),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
