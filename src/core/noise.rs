//! Stochastic forcing for the stochastic integrators.
//!
//! `generate` returns the increment `dW` (white: `sqrt(dt) * N(0, 1)`, or an
//! Ornstein-Uhlenbeck process when `ntau > 0`) and `gfun` the state-dependent
//! amplitude. Each scheme multiplies the two.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Component, Result, SimError};
use crate::prng::Prng;
use crate::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum NoiseKind {
    /// `g(x) = sqrt(2 * nsig)`
    #[default]
    Additive,
    /// `g(x) = sqrt(2 * nsig * |a * x + b|)`
    Multiplicative { a: f64, b: f64 },
}

/// Serializable noise configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NoiseConfig {
    pub kind: NoiseKind,
    /// Diffusion coefficient; one value shared by all variables or one per variable.
    pub nsig: Vec<f64>,
    /// Correlation time of coloured noise. `0` means white noise.
    pub ntau: f64,
    pub seed: u64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            kind: NoiseKind::Additive,
            nsig: vec![1.0],
            ntau: 0.0,
            seed: 42,
        }
    }
}

/// Generator state that must survive a checkpoint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoiseState {
    pub rng: u64,
    /// Ornstein-Uhlenbeck process, empty for white noise.
    pub eta: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Noise {
    config: NoiseConfig,
    rng: Prng,
    dt: f64,
    shape: (usize, usize, usize),
    // Coloured noise.
    eta: Vec<f64>,
    e: f64,
    sqrt_1_e2: f64,
    configured: bool,
}

impl Noise {
    pub fn new(config: NoiseConfig) -> Self {
        let rng = Prng::new(config.seed);
        Self {
            config,
            rng,
            dt: 0.0,
            shape: (0, 0, 0),
            eta: Vec::new(),
            e: 0.0,
            sqrt_1_e2: 0.0,
            configured: false,
        }
    }

    pub fn additive(nsig: f64) -> Self {
        Self::new(NoiseConfig {
            nsig: vec![nsig],
            ..NoiseConfig::default()
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self.rng = Prng::new(seed);
        self
    }

    pub fn with_ntau(mut self, ntau: f64) -> Self {
        self.config.ntau = ntau;
        self
    }

    pub fn with_kind(mut self, kind: NoiseKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    pub fn is_coloured(&self) -> bool {
        self.config.ntau > 0.0
    }

    /// Size internal buffers for a `(nvar, nnode, nmode)` state and reset the stream.
    pub fn configure(&mut self, dt: f64, nvar: usize, nnode: usize, nmode: usize) -> Result<()> {
        let nsig = &self.config.nsig;
        if nsig.len() != 1 && nsig.len() != nvar {
            return Err(SimError::config(
                Component::Noise,
                format!("nsig has {} entries; expected 1 or {nvar}", nsig.len()),
            ));
        }
        if nsig.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(SimError::config(
                Component::Noise,
                "nsig must be finite and non-negative",
            ));
        }
        if !(self.config.ntau >= 0.0 && self.config.ntau.is_finite()) {
            return Err(SimError::config(
                Component::Noise,
                format!("ntau must be finite and >= 0, got {}", self.config.ntau),
            ));
        }
        self.dt = dt;
        self.shape = (nvar, nnode, nmode);
        self.rng = Prng::new(self.config.seed);
        if self.is_coloured() {
            self.e = (-dt / self.config.ntau).exp();
            self.sqrt_1_e2 = (1.0 - self.e * self.e).sqrt();
            self.eta = vec![0.0; nvar * nnode * nmode];
            self.rng.fill_normal(&mut self.eta);
        } else {
            self.eta.clear();
        }
        self.configured = true;
        Ok(())
    }

    #[inline]
    fn nsig(&self, var: usize) -> f64 {
        match self.config.nsig.as_slice() {
            [single] => *single,
            per_var => per_var[var],
        }
    }

    /// Draw the next increment into `out` (same shape as the state).
    pub fn generate(&mut self, out: &mut State) {
        debug_assert!(self.configured);
        if self.is_coloured() {
            let scale = self.dt * (1.0 / self.config.ntau).sqrt();
            for (eta, o) in self.eta.iter_mut().zip(out.data_mut()) {
                *eta = *eta * self.e + self.sqrt_1_e2 * self.rng.next_normal();
                *o = scale * *eta;
            }
        } else {
            let sqrt_dt = self.dt.sqrt();
            for o in out.data_mut() {
                *o = sqrt_dt * self.rng.next_normal();
            }
        }
    }

    /// Noise amplitude `g(x)` for every entry of `x`.
    pub fn gfun(&self, x: &State, out: &mut State) {
        let per_var = x.nnode() * x.nmode();
        for v in 0..x.nvar() {
            let two_nsig = 2.0 * self.nsig(v);
            let src = &x.data()[v * per_var..(v + 1) * per_var];
            let dst = &mut out.data_mut()[v * per_var..(v + 1) * per_var];
            match self.config.kind {
                NoiseKind::Additive => dst.iter_mut().for_each(|g| *g = two_nsig.sqrt()),
                NoiseKind::Multiplicative { a, b } => {
                    for (g, &xv) in dst.iter_mut().zip(src) {
                        *g = (two_nsig * (a * xv + b).abs()).sqrt();
                    }
                }
            }
        }
    }

    pub fn state(&self) -> NoiseState {
        NoiseState {
            rng: self.rng.state(),
            eta: self.eta.clone(),
        }
    }

    pub fn restore(&mut self, state: &NoiseState) -> Result<()> {
        if state.eta.len() != self.eta.len() {
            return Err(SimError::Checkpoint(format!(
                "noise state has {} coloured entries, expected {}",
                state.eta.len(),
                self.eta.len()
            )));
        }
        self.rng = Prng::from_state(state.rng);
        self.eta.copy_from_slice(&state.eta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn white_noise_scales_with_sqrt_dt() {
        let mut noise = Noise::additive(1.0).with_seed(3);
        noise.configure(0.01, 1, 20_000, 1).unwrap();
        let mut dw = State::zeros(1, 20_000, 1);
        noise.generate(&mut dw);
        let var = dw.data().iter().map(|x| x * x).sum::<f64>() / 20_000.0;
        assert_relative_eq!(var, 0.01, max_relative = 0.05);
    }

    #[test]
    fn additive_gfun_is_constant() {
        let noise = Noise::additive(0.5);
        let x = State::from_rows(&[vec![-3.0, 7.0]]).unwrap();
        let mut g = State::zeros(1, 2, 1);
        noise.gfun(&x, &mut g);
        assert_eq!(g.data(), &[1.0, 1.0]);
    }

    #[test]
    fn multiplicative_gfun_tracks_state() {
        let noise = Noise::additive(0.5).with_kind(NoiseKind::Multiplicative { a: 1.0, b: 0.0 });
        let x = State::from_rows(&[vec![-4.0, 9.0]]).unwrap();
        let mut g = State::zeros(1, 2, 1);
        noise.gfun(&x, &mut g);
        assert_relative_eq!(g.get(0, 0, 0), 2.0);
        assert_relative_eq!(g.get(0, 1, 0), 3.0);
    }

    #[test]
    fn nsig_length_is_checked() {
        let mut noise = Noise::new(NoiseConfig {
            nsig: vec![1.0, 2.0, 3.0],
            ..NoiseConfig::default()
        });
        assert!(noise.configure(0.1, 2, 4, 1).is_err());
        assert!(noise.configure(0.1, 3, 4, 1).is_ok());
    }

    #[test]
    fn restore_replays_the_same_draws() {
        let mut noise = Noise::additive(1.0).with_ntau(2.0);
        noise.configure(0.1, 2, 3, 1).unwrap();
        let mut a = State::zeros(2, 3, 1);
        noise.generate(&mut a);
        let saved = noise.state();
        noise.generate(&mut a);
        let expected = a.clone();
        noise.restore(&saved).unwrap();
        noise.generate(&mut a);
        assert_eq!(a, expected);
    }

    #[test]
    fn coloured_noise_is_correlated() {
        let mut noise = Noise::additive(1.0).with_ntau(50.0).with_seed(11);
        noise.configure(0.1, 1, 1, 1).unwrap();
        let mut x = State::zeros(1, 1, 1);
        let draws: Vec<f64> = (0..5000)
            .map(|_| {
                noise.generate(&mut x);
                x.get(0, 0, 0)
            })
            .collect();
        let lag1: f64 = draws.windows(2).map(|w| w[0] * w[1]).sum();
        let lag0: f64 = draws.iter().map(|v| v * v).sum();
        assert!(lag1 / lag0 > 0.9);
    }
}
