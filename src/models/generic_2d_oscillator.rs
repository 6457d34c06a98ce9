#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::state::{Parameter, State};

use super::Model;

/// Two-variable generic oscillator (FitzHugh-Nagumo family).
///
/// ```text
/// dV = d * tau * (alpha * W - f * V^3 + e * V^2 + g * V + gamma * I + gamma * c + lc)
/// dW = d * (a + b * V + c * V^2 - beta * W) / tau
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Generic2dOscillator {
    pub tau: Parameter,
    pub i_ext: Parameter,
    pub a: Parameter,
    pub b: Parameter,
    pub c: Parameter,
    pub d: Parameter,
    pub e: Parameter,
    pub f: Parameter,
    pub g: Parameter,
    pub alpha: Parameter,
    pub beta: Parameter,
    pub gamma: Parameter,
    pub variables_of_interest: Vec<usize>,
}

impl Default for Generic2dOscillator {
    fn default() -> Self {
        Self {
            tau: 1.0.into(),
            i_ext: 0.0.into(),
            a: (-2.0).into(),
            b: (-10.0).into(),
            c: 0.0.into(),
            d: 0.02.into(),
            e: 3.0.into(),
            f: 1.0.into(),
            g: 0.0.into(),
            alpha: 1.0.into(),
            beta: 1.0.into(),
            gamma: 1.0.into(),
            variables_of_interest: vec![0],
        }
    }
}

impl Model for Generic2dOscillator {
    fn name(&self) -> &'static str {
        "Generic2dOscillator"
    }

    fn state_variables(&self) -> &[&'static str] {
        &["V", "W"]
    }

    fn cvar(&self) -> &[usize] {
        &[0]
    }

    fn variables_of_interest(&self) -> &[usize] {
        &self.variables_of_interest
    }

    fn state_variable_range(&self) -> &[(f64, f64)] {
        &[(-2.0, 4.0), (-6.0, 6.0)]
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![
            ("tau", &self.tau),
            ("I", &self.i_ext),
            ("a", &self.a),
            ("b", &self.b),
            ("c", &self.c),
            ("d", &self.d),
            ("e", &self.e),
            ("f", &self.f),
            ("g", &self.g),
            ("alpha", &self.alpha),
            ("beta", &self.beta),
            ("gamma", &self.gamma),
        ]
    }

    fn dfun(&self, x: &State, c: &State, lc: &State, dx: &mut State) {
        for node in 0..x.nnode() {
            let tau = self.tau.at(node);
            let d = self.d.at(node);
            let gamma = self.gamma.at(node);
            let i_ext = self.i_ext.at(node);
            let (a, b, cc) = (self.a.at(node), self.b.at(node), self.c.at(node));
            let (e, f, g) = (self.e.at(node), self.f.at(node), self.g.at(node));
            let (alpha, beta) = (self.alpha.at(node), self.beta.at(node));
            for mode in 0..x.nmode() {
                let v = x.get(0, node, mode);
                let w = x.get(1, node, mode);
                let c0 = c.get(0, node, mode);
                let lc0 = lc.get(0, node, mode);

                let dv = d * tau
                    * (alpha * w - f * v * v * v + e * v * v + g * v + gamma * i_ext + gamma * c0 + lc0);
                let dw = d * (a + b * v + cc * v * v - beta * w) / tau;
                dx.set(0, node, mode, dv);
                dx.set(1, node, mode, dw);
            }
        }
    }
}
