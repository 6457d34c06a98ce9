#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::state::{Parameter, State};

use super::Model;

/// Jansen-Rit cortical column (pyramidal, excitatory and inhibitory
/// interneuron populations, six state variables).
///
/// Coupled through `y1` and `y2`; the `SigmoidalJansenRit` coupling turns
/// `y1 - y2` of the sources into a firing rate delivered on coupling variable 0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct JansenRit {
    /// Maximum excitatory PSP amplitude (mV).
    pub big_a: Parameter,
    /// Maximum inhibitory PSP amplitude (mV).
    pub big_b: Parameter,
    /// Excitatory rate constant (1/ms).
    pub a: Parameter,
    /// Inhibitory rate constant (1/ms).
    pub b: Parameter,
    pub v0: Parameter,
    pub nu_max: Parameter,
    pub r: Parameter,
    pub j: Parameter,
    pub a_1: Parameter,
    pub a_2: Parameter,
    pub a_3: Parameter,
    pub a_4: Parameter,
    /// Mean extrinsic input.
    pub mu: Parameter,
    pub variables_of_interest: Vec<usize>,
}

impl Default for JansenRit {
    fn default() -> Self {
        Self {
            big_a: 3.25.into(),
            big_b: 22.0.into(),
            a: 0.1.into(),
            b: 0.05.into(),
            v0: 5.52.into(),
            nu_max: 0.0025.into(),
            r: 0.56.into(),
            j: 135.0.into(),
            a_1: 1.0.into(),
            a_2: 0.8.into(),
            a_3: 0.25.into(),
            a_4: 0.25.into(),
            mu: 0.22.into(),
            variables_of_interest: vec![0, 1, 2, 3],
        }
    }
}

impl Model for JansenRit {
    fn name(&self) -> &'static str {
        "JansenRit"
    }

    fn state_variables(&self) -> &[&'static str] {
        &["y0", "y1", "y2", "y3", "y4", "y5"]
    }

    fn cvar(&self) -> &[usize] {
        &[1, 2]
    }

    fn variables_of_interest(&self) -> &[usize] {
        &self.variables_of_interest
    }

    fn state_variable_range(&self) -> &[(f64, f64)] {
        &[
            (-1.0, 1.0),
            (-500.0, 500.0),
            (-50.0, 50.0),
            (-6.0, 6.0),
            (-20.0, 20.0),
            (-500.0, 500.0),
        ]
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![
            ("A", &self.big_a),
            ("B", &self.big_b),
            ("a", &self.a),
            ("b", &self.b),
            ("v0", &self.v0),
            ("nu_max", &self.nu_max),
            ("r", &self.r),
            ("J", &self.j),
            ("a_1", &self.a_1),
            ("a_2", &self.a_2),
            ("a_3", &self.a_3),
            ("a_4", &self.a_4),
            ("mu", &self.mu),
        ]
    }

    fn dfun(&self, x: &State, c: &State, lc: &State, dx: &mut State) {
        for node in 0..x.nnode() {
            let big_a = self.big_a.at(node);
            let big_b = self.big_b.at(node);
            let a = self.a.at(node);
            let b = self.b.at(node);
            let v0 = self.v0.at(node);
            let r = self.r.at(node);
            let j = self.j.at(node);
            let two_nu = 2.0 * self.nu_max.at(node);
            let sigm = |v: f64| two_nu / (1.0 + (r * (v0 - v)).exp());

            for mode in 0..x.nmode() {
                let y: [f64; 6] = core::array::from_fn(|v| x.get(v, node, mode));
                let long_range = c.get(0, node, mode);
                let short_range = lc.get(1, node, mode) - lc.get(2, node, mode);

                let sigm_y1_y2 = sigm(y[1] - y[2]);
                let sigm_y0_1 = sigm(self.a_1.at(node) * j * y[0]);
                let sigm_y0_3 = sigm(self.a_3.at(node) * j * y[0]);

                let exc_input = self.mu.at(node) + self.a_2.at(node) * j * sigm_y0_1 + long_range + short_range;

                dx.set(0, node, mode, y[3]);
                dx.set(1, node, mode, y[4]);
                dx.set(2, node, mode, y[5]);
                dx.set(3, node, mode, big_a * a * sigm_y1_y2 - 2.0 * a * y[3] - a * a * y[0]);
                dx.set(4, node, mode, big_a * a * exc_input - 2.0 * a * y[4] - a * a * y[1]);
                dx.set(
                    5,
                    node,
                    mode,
                    big_b * b * (self.a_4.at(node) * j * sigm_y0_3) - 2.0 * b * y[5] - b * b * y[2],
                );
            }
        }
    }
}
