//! JSON experiment descriptions.
//!
//! ```json
//! {
//!   "connectivity": { "weights": [[0, 1], [1, 0]], "tract_lengths": [[0, 10], [10, 0]] },
//!   "model": { "type": "Generic2dOscillator" },
//!   "coupling": { "type": "Linear", "a": 0.0152 },
//!   "integrator": { "scheme": "HeunDeterministic", "dt": 0.1 },
//!   "monitors": [{ "type": "TemporalAverage", "period": 1.0 }],
//!   "simulation_length": 1000.0
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connectivity::{Connectivity, Speed, WeightScaling};
use crate::coupling::{self, Coupling};
use crate::error::Result;
use crate::integrators::IntegratorSpec;
use crate::models::{self, Model};
use crate::monitors::{self, Monitor};
use crate::simulator::{ExecutionTier, Simulator};
use crate::state::State;
use crate::stimulus::Stimulus;
use crate::surface::Surface;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivitySpec {
    /// Target rows, source columns.
    pub weights: Vec<Vec<f64>>,
    /// Omitted when `centres` are given.
    #[serde(default)]
    pub tract_lengths: Vec<Vec<f64>>,
    #[serde(default)]
    pub speed: Option<Speed>,
    #[serde(default)]
    pub centres: Option<Vec<[f64; 3]>>,
    #[serde(default)]
    pub region_labels: Option<Vec<String>>,
    #[serde(default)]
    pub weight_scaling: WeightScaling,
    #[serde(default)]
    pub remove_self_connections: bool,
}

impl ConnectivitySpec {
    pub fn build(&self) -> Result<Connectivity> {
        let mut conn = Connectivity::from_rows(&self.weights, &self.tract_lengths)?;
        if let Some(speed) = &self.speed {
            conn = conn.with_speed(speed.clone());
        }
        if let Some(centres) = &self.centres {
            conn = conn.with_centres(centres.clone());
        }
        if let Some(labels) = &self.region_labels {
            conn = conn.with_region_labels(labels.clone());
        }
        if self.remove_self_connections {
            conn.remove_self_connections();
        }
        conn.apply_weight_scaling(self.weight_scaling);
        Ok(conn)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelSpec {
    Linear(models::Linear),
    Generic2dOscillator(models::Generic2dOscillator),
    Kuramoto(models::Kuramoto),
    WilsonCowan(models::WilsonCowan),
    JansenRit(models::JansenRit),
}

impl ModelSpec {
    pub fn build(&self) -> Box<dyn Model> {
        match self {
            Self::Linear(m) => Box::new(m.clone()),
            Self::Generic2dOscillator(m) => Box::new(m.clone()),
            Self::Kuramoto(m) => Box::new(m.clone()),
            Self::WilsonCowan(m) => Box::new(m.clone()),
            Self::JansenRit(m) => Box::new(m.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CouplingSpec {
    Linear(coupling::Linear),
    Scaling(coupling::Scaling),
    Sigmoidal(coupling::Sigmoidal),
    SigmoidalJansenRit(coupling::SigmoidalJansenRit),
    HyperbolicTangent(coupling::HyperbolicTangent),
    Kuramoto(coupling::Kuramoto),
    Difference(coupling::Difference),
    PreSigmoidal(coupling::PreSigmoidal),
}

impl CouplingSpec {
    pub fn build(&self) -> Box<dyn Coupling> {
        match self {
            Self::Linear(c) => Box::new(*c),
            Self::Scaling(c) => Box::new(*c),
            Self::Sigmoidal(c) => Box::new(*c),
            Self::SigmoidalJansenRit(c) => Box::new(*c),
            Self::HyperbolicTangent(c) => Box::new(*c),
            Self::Kuramoto(c) => Box::new(*c),
            Self::Difference(c) => Box::new(*c),
            Self::PreSigmoidal(c) => Box::new(*c),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorSpec {
    Raw(monitors::Raw),
    SubSample(monitors::SubSample),
    TemporalAverage(monitors::TemporalAverage),
    SpatialAverage(monitors::SpatialAverage),
    Projection(monitors::Projection),
    Bold(monitors::Bold),
}

impl MonitorSpec {
    pub fn build(&self) -> Box<dyn Monitor> {
        match self {
            Self::Raw(m) => Box::new(m.clone()),
            Self::SubSample(m) => Box::new(m.clone()),
            Self::TemporalAverage(m) => Box::new(m.clone()),
            Self::SpatialAverage(m) => Box::new(m.clone()),
            Self::Projection(m) => Box::new(m.clone()),
            Self::Bold(m) => Box::new(m.clone()),
        }
    }
}

fn default_simulation_length() -> f64 {
    1000.0
}

fn default_seed() -> u64 {
    42
}

/// A complete experiment: network, dynamics, integration and observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub connectivity: ConnectivitySpec,
    pub model: ModelSpec,
    pub coupling: CouplingSpec,
    pub integrator: IntegratorSpec,
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
    #[serde(default)]
    pub stimulus: Option<Stimulus>,
    #[serde(default)]
    pub surface: Option<Surface>,
    /// Length of one pass in ms.
    #[serde(default = "default_simulation_length")]
    pub simulation_length: f64,
    /// Time-ordered states, oldest first.
    #[serde(default)]
    pub initial_conditions: Option<Vec<State>>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub execution_tier: ExecutionTier,
}

impl ExperimentSpec {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Assemble and configure the simulator.
    pub fn build(&self) -> Result<Simulator> {
        let mut sim = Simulator::from_boxed(
            self.model.build(),
            self.connectivity.build()?,
            self.coupling.build(),
            self.integrator.build()?,
        )
        .with_simulation_length(self.simulation_length)
        .with_seed(self.seed)
        .with_execution_tier(self.execution_tier);
        for monitor in &self.monitors {
            sim = sim.with_boxed_monitor(monitor.build());
        }
        if let Some(stimulus) = &self.stimulus {
            sim = sim.with_stimulus(stimulus.clone());
        }
        if let Some(surface) = &self.surface {
            sim = sim.with_surface(surface.clone());
        }
        if let Some(states) = &self.initial_conditions {
            sim = sim.with_initial_conditions(states.clone());
        }
        debug!(monitors = self.monitors.len(), "experiment assembled");
        sim.configure()?;
        Ok(sim)
    }
}
