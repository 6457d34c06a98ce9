#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::state::{Parameter, State};

use super::Model;

/// Excitatory/inhibitory population rate model.
///
/// `c_ie` is the inhibitory-to-excitatory weight and `c_ei` the
/// excitatory-to-inhibitory one. Both populations are coupled (`cvar = [0, 1]`)
/// but only the excitatory one receives long-range input.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WilsonCowan {
    pub c_ee: Parameter,
    pub c_ie: Parameter,
    pub c_ei: Parameter,
    pub c_ii: Parameter,
    pub tau_e: Parameter,
    pub tau_i: Parameter,
    pub a_e: Parameter,
    pub b_e: Parameter,
    pub c_e: Parameter,
    pub theta_e: Parameter,
    pub a_i: Parameter,
    pub b_i: Parameter,
    pub c_i: Parameter,
    pub theta_i: Parameter,
    pub r_e: Parameter,
    pub r_i: Parameter,
    pub k_e: Parameter,
    pub k_i: Parameter,
    pub p: Parameter,
    pub q: Parameter,
    pub alpha_e: Parameter,
    pub alpha_i: Parameter,
    /// Shift the sigmoids so that zero input gives zero rate.
    pub shift_sigmoid: bool,
    pub variables_of_interest: Vec<usize>,
}

impl Default for WilsonCowan {
    fn default() -> Self {
        Self {
            c_ee: 12.0.into(),
            c_ie: 4.0.into(),
            c_ei: 13.0.into(),
            c_ii: 11.0.into(),
            tau_e: 10.0.into(),
            tau_i: 10.0.into(),
            a_e: 1.2.into(),
            b_e: 2.8.into(),
            c_e: 1.0.into(),
            theta_e: 0.0.into(),
            a_i: 1.0.into(),
            b_i: 4.0.into(),
            c_i: 1.0.into(),
            theta_i: 0.0.into(),
            r_e: 1.0.into(),
            r_i: 1.0.into(),
            k_e: 1.0.into(),
            k_i: 1.0.into(),
            p: 0.0.into(),
            q: 0.0.into(),
            alpha_e: 1.0.into(),
            alpha_i: 1.0.into(),
            shift_sigmoid: true,
            variables_of_interest: vec![0, 1],
        }
    }
}

impl WilsonCowan {
    #[inline]
    fn sigmoid(&self, input: f64, a: f64, b: f64, c: f64) -> f64 {
        let s = c / (1.0 + (-a * (input - b)).exp());
        if self.shift_sigmoid {
            s - c / (1.0 + (a * b).exp())
        } else {
            s
        }
    }
}

impl Model for WilsonCowan {
    fn name(&self) -> &'static str {
        "WilsonCowan"
    }

    fn state_variables(&self) -> &[&'static str] {
        &["E", "I"]
    }

    fn cvar(&self) -> &[usize] {
        &[0, 1]
    }

    fn variables_of_interest(&self) -> &[usize] {
        &self.variables_of_interest
    }

    fn state_variable_range(&self) -> &[(f64, f64)] {
        &[(0.0, 1.0), (0.0, 1.0)]
    }

    fn state_variable_boundaries(&self) -> Vec<(usize, (f64, f64))> {
        vec![(0, (0.0, 1.0)), (1, (0.0, 1.0))]
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![
            ("c_ee", &self.c_ee),
            ("c_ie", &self.c_ie),
            ("c_ei", &self.c_ei),
            ("c_ii", &self.c_ii),
            ("tau_e", &self.tau_e),
            ("tau_i", &self.tau_i),
            ("a_e", &self.a_e),
            ("b_e", &self.b_e),
            ("c_e", &self.c_e),
            ("theta_e", &self.theta_e),
            ("a_i", &self.a_i),
            ("b_i", &self.b_i),
            ("c_i", &self.c_i),
            ("theta_i", &self.theta_i),
            ("r_e", &self.r_e),
            ("r_i", &self.r_i),
            ("k_e", &self.k_e),
            ("k_i", &self.k_i),
            ("P", &self.p),
            ("Q", &self.q),
            ("alpha_e", &self.alpha_e),
            ("alpha_i", &self.alpha_i),
        ]
    }

    fn dfun(&self, x: &State, c: &State, lc: &State, dx: &mut State) {
        for node in 0..x.nnode() {
            for mode in 0..x.nmode() {
                let e = x.get(0, node, mode);
                let i = x.get(1, node, mode);
                let c0 = c.get(0, node, mode);
                let local = lc.get(0, node, mode) + lc.get(1, node, mode);

                let x_e = self.alpha_e.at(node)
                    * (self.c_ee.at(node) * e - self.c_ie.at(node) * i + self.p.at(node)
                        - self.theta_e.at(node)
                        + c0
                        + local);
                let x_i = self.alpha_i.at(node)
                    * (self.c_ei.at(node) * e - self.c_ii.at(node) * i + self.q.at(node)
                        - self.theta_i.at(node)
                        + local);

                let s_e = self.sigmoid(x_e, self.a_e.at(node), self.b_e.at(node), self.c_e.at(node));
                let s_i = self.sigmoid(x_i, self.a_i.at(node), self.b_i.at(node), self.c_i.at(node));

                let de = (-e + (self.k_e.at(node) - self.r_e.at(node) * e) * s_e) / self.tau_e.at(node);
                let di = (-i + (self.k_i.at(node) - self.r_i.at(node) * i) * s_i) / self.tau_i.at(node);
                dx.set(0, node, mode, de);
                dx.set(1, node, mode, di);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quiescent_state_is_a_fixed_point_with_shifted_sigmoid() {
        let model = WilsonCowan::default();
        let x = State::zeros(2, 3, 1);
        let c = State::zeros(2, 3, 1);
        let lc = State::zeros(2, 3, 1);
        let mut dx = State::filled(2, 3, 1, 9.0);
        model.dfun(&x, &c, &lc, &mut dx);
        for v in dx.data() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn excitatory_input_raises_e() {
        let model = WilsonCowan::default();
        let x = State::zeros(2, 1, 1);
        let c = State::from_rows(&[vec![5.0], vec![0.0]]).unwrap();
        let lc = State::zeros(2, 1, 1);
        let mut dx = State::zeros(2, 1, 1);
        model.dfun(&x, &c, &lc, &mut dx);
        assert!(dx.get(0, 0, 0) > 0.0);
        assert_relative_eq!(dx.get(1, 0, 0), 0.0, epsilon = 1e-12);
    }
}
