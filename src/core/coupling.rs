//! Long-range coupling functions.
//!
//! Every variant shares one reduction: for target `k`, coupling variable `c`
//! and mode `m`,
//!
//! ```text
//! gx[c, k, m] = sum_j weights[k, j] * pre(x_i[:, k, m], x_j[k, :, j, m])[c]
//! out[:, k, m] = post(gx[:, k, m])
//! ```
//!
//! Variants only differ in `pre` / `post`, so they can be swapped without
//! touching the simulator loop.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use core::fmt;

use crate::error::{Component, Result, SimError};
use crate::state::{DelayedState, State};

pub trait Coupling: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Minimum number of coupling variables the model must expose.
    fn required_cvars(&self) -> usize {
        1
    }

    /// Validate against the wired model/connectivity.
    fn configure(&mut self, ncvar: usize, _nnode: usize) -> Result<()> {
        if ncvar < self.required_cvars() {
            return Err(SimError::config(
                Component::Coupling,
                format!(
                    "{} coupling needs {} coupling variables, model exposes {ncvar}",
                    self.name(),
                    self.required_cvars()
                ),
            ));
        }
        Ok(())
    }

    /// Per-edge nonlinearity. Slices are indexed by coupling variable.
    fn pre(&self, x_i: &[f64], x_j: &[f64], out: &mut [f64]);

    /// Per-target transform of the weighted sum. `n_sources` is the region count.
    fn post(&self, _gx: &mut [f64], _n_sources: usize) {}

    /// Divide each target's sum by its in-strength before `post`.
    fn in_strength_normalised(&self) -> bool {
        false
    }

    /// Whether each target's sum depends only on that target's row, which lets
    /// the reduction run one target per task.
    fn is_per_target(&self) -> bool {
        true
    }

    /// Afferent coupling for every target.
    ///
    /// `x_i` is `(ncvar, nnode, nmode)`, `x_j` the delayed gather and `out` is
    /// written with the same shape as `x_i`.
    fn couple(&self, weights: &[f64], x_i: &State, x_j: &DelayedState, out: &mut State) {
        let (ncvar, n, m) = x_i.shape();
        let mut afferent = vec![0.0; n * ncvar * m];
        afferent
            .chunks_mut(ncvar * m)
            .enumerate()
            .for_each(|(k, dst)| reduce_target(self, weights, x_i, x_j, k, dst));
        scatter_targets(&afferent, out);
    }
}

/// Parallel form of `Coupling::couple` (one target per rayon task).
#[cfg(feature = "parallel")]
pub fn couple_parallel(
    coupling: &dyn Coupling,
    weights: &[f64],
    x_i: &State,
    x_j: &DelayedState,
    out: &mut State,
) {
    if !coupling.is_per_target() {
        coupling.couple(weights, x_i, x_j, out);
        return;
    }
    let (ncvar, n, m) = x_i.shape();
    let mut afferent = vec![0.0; n * ncvar * m];
    afferent
        .par_chunks_mut(ncvar * m)
        .enumerate()
        .for_each(|(k, dst)| reduce_target(coupling, weights, x_i, x_j, k, dst));
    scatter_targets(&afferent, out);
}

// dst layout: [mode][cvar]
fn reduce_target<C: Coupling + ?Sized>(
    coupling: &C,
    weights: &[f64],
    x_i: &State,
    x_j: &DelayedState,
    k: usize,
    dst: &mut [f64],
) {
    let (ncvar, n, m) = x_i.shape();
    let row = &weights[k * n..(k + 1) * n];
    let block = x_j.target(k);

    let mut xi = vec![0.0; ncvar];
    let mut xj = vec![0.0; ncvar];
    let mut pre = vec![0.0; ncvar];

    let strength = if coupling.in_strength_normalised() {
        let s: f64 = row.iter().sum();
        // Isolated targets: infinite strength turns the sum into 0 instead of NaN.
        if s == 0.0 {
            f64::INFINITY
        } else {
            s
        }
    } else {
        1.0
    };

    for mode in 0..m {
        for c in 0..ncvar {
            xi[c] = x_i.get(c, k, mode);
        }
        let gx = &mut dst[mode * ncvar..(mode + 1) * ncvar];
        gx.iter_mut().for_each(|g| *g = 0.0);
        for (j, &w) in row.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            for c in 0..ncvar {
                xj[c] = block[(c * n + j) * m + mode];
            }
            coupling.pre(&xi, &xj, &mut pre);
            for c in 0..ncvar {
                gx[c] += w * pre[c];
            }
        }
        if strength != 1.0 {
            gx.iter_mut().for_each(|g| *g /= strength);
        }
        coupling.post(gx, n);
    }
}

fn scatter_targets(afferent: &[f64], out: &mut State) {
    let (ncvar, n, m) = out.shape();
    for k in 0..n {
        for mode in 0..m {
            for c in 0..ncvar {
                out.set(c, k, mode, afferent[(k * m + mode) * ncvar + c]);
            }
        }
    }
}

/// `a * sum(w * x_j) + b`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Linear {
    pub a: f64,
    pub b: f64,
}

impl Default for Linear {
    fn default() -> Self {
        Self {
            a: 0.00390625,
            b: 0.0,
        }
    }
}

impl Coupling for Linear {
    fn name(&self) -> &'static str {
        "Linear"
    }

    fn pre(&self, _x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        out.copy_from_slice(x_j);
    }

    fn post(&self, gx: &mut [f64], _n: usize) {
        gx.iter_mut().for_each(|g| *g = self.a * *g + self.b);
    }
}

/// `a * sum(w * x_j)`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Scaling {
    pub a: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self { a: 1.0 }
    }
}

impl Coupling for Scaling {
    fn name(&self) -> &'static str {
        "Scaling"
    }

    fn pre(&self, _x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        out.copy_from_slice(x_j);
    }

    fn post(&self, gx: &mut [f64], _n: usize) {
        gx.iter_mut().for_each(|g| *g *= self.a);
    }
}

/// Sigmoid applied to the weighted sum:
/// `cmin + (cmax - cmin) / (1 + exp(-a * (gx - midpoint) / sigma))`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Sigmoidal {
    pub cmin: f64,
    pub cmax: f64,
    pub midpoint: f64,
    pub a: f64,
    pub sigma: f64,
}

impl Default for Sigmoidal {
    fn default() -> Self {
        Self {
            cmin: -1.0,
            cmax: 1.0,
            midpoint: 0.0,
            a: 1.0,
            sigma: 230.0,
        }
    }
}

impl Coupling for Sigmoidal {
    fn name(&self) -> &'static str {
        "Sigmoidal"
    }

    fn pre(&self, _x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        out.copy_from_slice(x_j);
    }

    fn post(&self, gx: &mut [f64], _n: usize) {
        for g in gx.iter_mut() {
            *g = self.cmin
                + (self.cmax - self.cmin) / (1.0 + (-self.a * ((*g - self.midpoint) / self.sigma)).exp());
        }
    }
}

/// Jansen-Rit firing-rate sigmoid of the pyramidal membrane potential
/// `x_j[0] - x_j[1]`; the result drives coupling variable 0 only.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SigmoidalJansenRit {
    pub cmin: f64,
    pub cmax: f64,
    pub midpoint: f64,
    pub r: f64,
    pub a: f64,
}

impl Default for SigmoidalJansenRit {
    fn default() -> Self {
        Self {
            cmin: 0.0,
            cmax: 2.0 * 0.0025,
            midpoint: 6.0,
            r: 0.56,
            a: 1.0,
        }
    }
}

impl Coupling for SigmoidalJansenRit {
    fn name(&self) -> &'static str {
        "SigmoidalJansenRit"
    }

    fn required_cvars(&self) -> usize {
        2
    }

    fn pre(&self, _x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        out.iter_mut().for_each(|o| *o = 0.0);
        out[0] = self.cmin
            + (self.cmax - self.cmin) / (1.0 + (self.r * (self.midpoint - (x_j[0] - x_j[1]))).exp());
    }

    fn post(&self, gx: &mut [f64], _n: usize) {
        gx[0] *= self.a;
    }
}

/// `a * (1 + tanh((b * x_j - midpoint) / sigma))`, optionally normalised by the
/// target's in-strength.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HyperbolicTangent {
    pub a: f64,
    pub b: f64,
    pub midpoint: f64,
    pub sigma: f64,
    pub normalise: bool,
}

impl Default for HyperbolicTangent {
    fn default() -> Self {
        Self {
            a: 1.0,
            b: 1.0,
            midpoint: 0.0,
            sigma: 1.0,
            normalise: true,
        }
    }
}

impl Coupling for HyperbolicTangent {
    fn name(&self) -> &'static str {
        "HyperbolicTangent"
    }

    fn pre(&self, _x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        for (o, &x) in out.iter_mut().zip(x_j) {
            *o = self.a * (1.0 + ((self.b * x - self.midpoint) / self.sigma).tanh());
        }
    }

    fn in_strength_normalised(&self) -> bool {
        self.normalise
    }
}

/// Kuramoto phase coupling: `a / N * sum(w * sin(x_j - x_i))`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Kuramoto {
    pub a: f64,
}

impl Default for Kuramoto {
    fn default() -> Self {
        Self { a: 1.0 }
    }
}

impl Coupling for Kuramoto {
    fn name(&self) -> &'static str {
        "Kuramoto"
    }

    fn pre(&self, x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        for ((o, &xj), &xi) in out.iter_mut().zip(x_j).zip(x_i) {
            *o = (xj - xi).sin();
        }
    }

    fn post(&self, gx: &mut [f64], n: usize) {
        let scale = self.a / n.max(1) as f64;
        gx.iter_mut().for_each(|g| *g *= scale);
    }
}

/// Diffusive coupling: `a * sum(w * (x_j - x_i))`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Difference {
    pub a: f64,
}

impl Default for Difference {
    fn default() -> Self {
        Self { a: 0.1 }
    }
}

impl Coupling for Difference {
    fn name(&self) -> &'static str {
        "Difference"
    }

    fn pre(&self, x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        for ((o, &xj), &xi) in out.iter_mut().zip(x_j).zip(x_i) {
            *o = xj - xi;
        }
    }

    fn post(&self, gx: &mut [f64], _n: usize) {
        gx.iter_mut().for_each(|g| *g *= self.a);
    }
}

/// Sigmoidal drive with a static or dynamic threshold.
///
/// Per edge: `A = h * (q + tanh(g * (p * x_j[0] - T)))` where `T` is `theta`
/// (static), the target's threshold variable `x_i[1]` (dynamic), or the network
/// mean of that variable (`global_t`). Output variable 0 is `sum(w * A)`;
/// with a dynamic threshold output variable 1 carries `sum(w * x_j[0])` so the
/// model can track its input.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PreSigmoidal {
    pub h: f64,
    pub q: f64,
    pub g: f64,
    pub p: f64,
    pub theta: f64,
    pub dynamic: bool,
    pub global_t: bool,
}

impl Default for PreSigmoidal {
    fn default() -> Self {
        Self {
            h: 0.5,
            q: 1.0,
            g: 60.0,
            p: 1.0,
            theta: 0.5,
            dynamic: true,
            global_t: false,
        }
    }
}

impl PreSigmoidal {
    #[inline]
    fn drive(&self, x: f64, threshold: f64) -> f64 {
        self.h * (self.q + (self.g * (self.p * x - threshold)).tanh())
    }
}

impl Coupling for PreSigmoidal {
    fn name(&self) -> &'static str {
        "PreSigmoidal"
    }

    fn required_cvars(&self) -> usize {
        if self.dynamic {
            2
        } else {
            1
        }
    }

    fn is_per_target(&self) -> bool {
        !(self.dynamic && self.global_t)
    }

    fn pre(&self, x_i: &[f64], x_j: &[f64], out: &mut [f64]) {
        out.iter_mut().for_each(|o| *o = 0.0);
        let threshold = if self.dynamic { x_i[1] } else { self.theta };
        out[0] = self.drive(x_j[0], threshold);
        if self.dynamic {
            out[1] = x_j[0];
        }
    }

    fn couple(&self, weights: &[f64], x_i: &State, x_j: &DelayedState, out: &mut State) {
        if self.is_per_target() {
            let (ncvar, n, m) = x_i.shape();
            let mut afferent = vec![0.0; n * ncvar * m];
            afferent
                .chunks_mut(ncvar * m)
                .enumerate()
                .for_each(|(k, dst)| reduce_target(self, weights, x_i, x_j, k, dst));
            scatter_targets(&afferent, out);
            return;
        }

        // Global threshold: every target uses the network mean of cvar 1.
        let (_, n, m) = x_i.shape();
        out.fill(0.0);
        for mode in 0..m {
            let threshold = (0..n).map(|k| x_i.get(1, k, mode)).sum::<f64>() / n as f64;
            for k in 0..n {
                let mut drive = 0.0;
                let mut raw = 0.0;
                for j in 0..n {
                    let w = weights[k * n + j];
                    if w == 0.0 {
                        continue;
                    }
                    let x = x_j.get(k, 0, j, mode);
                    drive += w * self.drive(x, threshold);
                    raw += w * x;
                }
                out.set(0, k, mode, drive);
                out.set(1, k, mode, raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// x_j with the same delayed value for each (target, source) pair: source j holds `values[j]`.
    fn gather(values: &[f64], ncvar: usize) -> DelayedState {
        let n = values.len();
        let mut d = DelayedState::zeros(ncvar, n, 1);
        let block = d.block_len();
        for k in 0..n {
            for c in 0..ncvar {
                for (j, v) in values.iter().enumerate() {
                    d.data_mut()[k * block + c * n + j] = *v + c as f64;
                }
            }
        }
        d
    }

    fn current(values: &[f64], ncvar: usize) -> State {
        let mut s = State::zeros(ncvar, values.len(), 1);
        for c in 0..ncvar {
            for (k, v) in values.iter().enumerate() {
                s.set(c, k, 0, *v + c as f64);
            }
        }
        s
    }

    #[test]
    fn linear_is_weighted_sum() {
        let weights = [0.0, 2.0, 0.5, 0.0];
        let x_j = gather(&[3.0, 5.0], 1);
        let x_i = current(&[3.0, 5.0], 1);
        let mut out = State::zeros(1, 2, 1);
        Linear { a: 1.0, b: 0.5 }.couple(&weights, &x_i, &x_j, &mut out);
        assert_relative_eq!(out.get(0, 0, 0), 2.0 * 5.0 + 0.5);
        assert_relative_eq!(out.get(0, 1, 0), 0.5 * 3.0 + 0.5);
    }

    #[test]
    fn weights_are_target_row_source_column() {
        // Only 1 -> 0 exists.
        let weights = [0.0, 1.0, 0.0, 0.0];
        let x_j = gather(&[7.0, 11.0], 1);
        let x_i = current(&[7.0, 11.0], 1);
        let mut out = State::zeros(1, 2, 1);
        Scaling { a: 1.0 }.couple(&weights, &x_i, &x_j, &mut out);
        assert_eq!(out.get(0, 0, 0), 11.0);
        assert_eq!(out.get(0, 1, 0), 0.0);
    }

    #[test]
    fn tanh_isolated_node_is_zero_not_nan() {
        // Node 2 receives nothing.
        let weights = [0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let x_j = gather(&[0.2, -0.3, 0.9], 1);
        let x_i = current(&[0.2, -0.3, 0.9], 1);
        let mut out = State::zeros(1, 3, 1);
        HyperbolicTangent::default().couple(&weights, &x_i, &x_j, &mut out);
        assert_eq!(out.get(0, 2, 0), 0.0);
        assert!(out.data().iter().all(|v| v.is_finite()));
        assert_relative_eq!(out.get(0, 0, 0), 1.0 + (-0.3f64).tanh());
    }

    #[test]
    fn kuramoto_scales_by_node_count() {
        let weights = [0.0, 1.0, 1.0, 0.0];
        let x_j = gather(&[0.0, core::f64::consts::FRAC_PI_2], 1);
        let x_i = current(&[0.0, core::f64::consts::FRAC_PI_2], 1);
        let mut out = State::zeros(1, 2, 1);
        Kuramoto { a: 2.0 }.couple(&weights, &x_i, &x_j, &mut out);
        assert_relative_eq!(out.get(0, 0, 0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.get(0, 1, 0), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn difference_vanishes_for_equal_states() {
        let weights = [0.0, 1.0, 1.0, 0.0];
        let x_j = gather(&[4.0, 4.0], 1);
        let x_i = current(&[4.0, 4.0], 1);
        let mut out = State::zeros(1, 2, 1);
        Difference::default().couple(&weights, &x_i, &x_j, &mut out);
        assert_eq!(out.data(), &[0.0, 0.0]);
    }

    #[test]
    fn sigmoidal_is_bounded() {
        let weights = [0.0, 1e6, 1e6, 0.0];
        let x_j = gather(&[1e3, -1e3], 1);
        let x_i = current(&[1e3, -1e3], 1);
        let mut out = State::zeros(1, 2, 1);
        Sigmoidal::default().couple(&weights, &x_i, &x_j, &mut out);
        assert!(out.data().iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn jansen_rit_needs_two_cvars() {
        let mut c = SigmoidalJansenRit::default();
        assert!(c.configure(1, 4).is_err());
        assert!(c.configure(2, 4).is_ok());
    }

    #[test]
    fn presigmoidal_static_threshold() {
        let c = PreSigmoidal {
            dynamic: false,
            ..PreSigmoidal::default()
        };
        let weights = [0.0, 1.0, 0.0, 0.0];
        let x_j = gather(&[0.0, 0.5], 1);
        let x_i = current(&[0.0, 0.5], 1);
        let mut out = State::zeros(1, 2, 1);
        c.couple(&weights, &x_i, &x_j, &mut out);
        // p * 0.5 - theta == 0 -> h * q
        assert_relative_eq!(out.get(0, 0, 0), 0.5);
    }

    #[test]
    fn presigmoidal_global_threshold_uses_network_mean() {
        let c = PreSigmoidal {
            global_t: true,
            ..PreSigmoidal::default()
        };
        let weights = [0.0, 1.0, 1.0, 0.0];
        // cvar 0 = [0.5, 1.5], cvar 1 = [1.5, 2.5] -> mean threshold 2.0
        let x_j = gather(&[0.5, 1.5], 2);
        let x_i = current(&[0.5, 1.5], 2);
        let mut out = State::zeros(2, 2, 1);
        c.couple(&weights, &x_i, &x_j, &mut out);
        let expected = 0.5 * (1.0 + (60.0f64 * (1.5 - 2.0)).tanh());
        assert_relative_eq!(out.get(0, 0, 0), expected);
        assert_relative_eq!(out.get(1, 0, 0), 1.5);
    }
}
