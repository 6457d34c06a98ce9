#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::state::{Parameter, State};

use super::Model;

/// Single linear variable: `dx = gamma * x + c + lc`.
///
/// With `gamma = 0` the node is a pure integrator of its input, which makes
/// delays directly visible in the trajectory.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Linear {
    pub gamma: Parameter,
    pub variables_of_interest: Vec<usize>,
}

impl Default for Linear {
    fn default() -> Self {
        Self {
            gamma: Parameter::Scalar(-10.0),
            variables_of_interest: vec![0],
        }
    }
}

impl Linear {
    pub fn with_gamma(gamma: f64) -> Self {
        Self {
            gamma: Parameter::Scalar(gamma),
            ..Self::default()
        }
    }
}

impl Model for Linear {
    fn name(&self) -> &'static str {
        "Linear"
    }

    fn state_variables(&self) -> &[&'static str] {
        &["x"]
    }

    fn cvar(&self) -> &[usize] {
        &[0]
    }

    fn variables_of_interest(&self) -> &[usize] {
        &self.variables_of_interest
    }

    fn state_variable_range(&self) -> &[(f64, f64)] {
        &[(-1.0, 1.0)]
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![("gamma", &self.gamma)]
    }

    fn dfun(&self, x: &State, c: &State, lc: &State, dx: &mut State) {
        let m = x.nmode();
        for node in 0..x.nnode() {
            let gamma = self.gamma.at(node);
            for mode in 0..m {
                let v = x.get(0, node, mode);
                dx.set(0, node, mode, gamma * v + c.get(0, node, mode) + lc.get(0, node, mode));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_towards_input() {
        let model = Linear::with_gamma(-2.0);
        let x = State::filled(1, 2, 1, 1.0);
        let c = State::filled(1, 2, 1, 0.5);
        let lc = State::zeros(1, 2, 1);
        let mut dx = State::zeros(1, 2, 1);
        model.dfun(&x, &c, &lc, &mut dx);
        assert_eq!(dx.data(), &[-1.5, -1.5]);
    }
}
