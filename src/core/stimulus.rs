//! Separable spatio-temporal stimulus: `spatial[node] * temporal(t)`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::equations::TemporalEquation;
use crate::error::{Component, Result, SimError};
use crate::state::State;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stimulus {
    /// Per-node weight of the stimulus.
    pub spatial: Vec<f64>,
    pub temporal: TemporalEquation,
    /// Stimulated state variables; defaults to the model's choice.
    #[cfg_attr(feature = "serde", serde(default))]
    pub variables: Option<Vec<usize>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    targets: Vec<usize>,
}

impl Stimulus {
    pub fn new(spatial: Vec<f64>, temporal: TemporalEquation) -> Self {
        Self {
            spatial,
            temporal,
            variables: None,
            targets: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: Vec<usize>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Resolve target variables and check the spatial pattern size.
    pub fn configure(&mut self, nnode: usize, nvar: usize, model_default: &[usize]) -> Result<()> {
        if self.spatial.len() != nnode {
            return Err(SimError::config(
                Component::Stimulus,
                format!(
                    "spatial pattern has {} entries, simulation has {nnode} nodes",
                    self.spatial.len()
                ),
            ));
        }
        let targets = self
            .variables
            .clone()
            .unwrap_or_else(|| model_default.to_vec());
        if let Some(bad) = targets.iter().find(|&&v| v >= nvar) {
            return Err(SimError::config(
                Component::Stimulus,
                format!("stimulated variable {bad} out of range for {nvar} state variables"),
            ));
        }
        self.targets = targets;
        Ok(())
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Fill `out` (state-shaped) with the stimulus at time `t`.
    pub fn evaluate(&self, t: f64, out: &mut State) {
        out.fill(0.0);
        let amplitude = self.temporal.evaluate(t);
        if amplitude == 0.0 {
            return;
        }
        for &v in &self.targets {
            for (node, &w) in self.spatial.iter().enumerate() {
                for mode in 0..out.nmode() {
                    out.set(v, node, mode, w * amplitude);
                }
            }
        }
    }
}
