#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::state::{Parameter, State};

use super::Model;

/// Phase oscillator: `dtheta = omega + c + sin(lc)`.
///
/// Pair with the `Kuramoto` coupling, which already carries the `sin` of the
/// phase difference.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Kuramoto {
    pub omega: Parameter,
    pub variables_of_interest: Vec<usize>,
}

impl Default for Kuramoto {
    fn default() -> Self {
        Self {
            omega: 1.0.into(),
            variables_of_interest: vec![0],
        }
    }
}

impl Model for Kuramoto {
    fn name(&self) -> &'static str {
        "Kuramoto"
    }

    fn state_variables(&self) -> &[&'static str] {
        &["theta"]
    }

    fn cvar(&self) -> &[usize] {
        &[0]
    }

    fn variables_of_interest(&self) -> &[usize] {
        &self.variables_of_interest
    }

    fn state_variable_range(&self) -> &[(f64, f64)] {
        &[(0.0, core::f64::consts::TAU)]
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![("omega", &self.omega)]
    }

    fn dfun(&self, x: &State, c: &State, lc: &State, dx: &mut State) {
        for node in 0..x.nnode() {
            let omega = self.omega.at(node);
            for mode in 0..x.nmode() {
                let input = c.get(0, node, mode) + lc.get(0, node, mode).sin();
                dx.set(0, node, mode, omega + input);
            }
        }
    }
}
