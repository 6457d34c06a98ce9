//! Haemodynamic (fMRI BOLD) monitor.
//!
//! Two buffering stages: the state is first averaged over a 4 ms interim
//! period, and each interim mean enters a slow ring of
//! `ceil(hrf_length / interim_period)` samples. At every sampling period the
//! slow ring is correlated with the reversed haemodynamic response so the
//! newest sample meets the kernel at lag zero.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::equations::HrfKernel;
use crate::error::{Component, Result, SimError};
use crate::state::State;

use super::{compute_istep, resolve_voi, Monitor, MonitorContext, Observed, Sample, Stock};

/// Interim averaging period in ms.
pub const INTERIM_PERIOD: f64 = 4.0;

/// Static Balloon-Windkessel nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BalloonWindkessel {
    /// Resting oxygen extraction fraction.
    pub e0: f64,
    /// Resting blood volume fraction (percent).
    pub v0: f64,
    /// Echo time (s).
    pub te: f64,
    /// Intra/extravascular signal ratio.
    pub epsilon: f64,
    /// Frequency offset at the outer surface of magnetised vessels (Hz).
    pub nu0: f64,
    /// Intravascular relaxation rate slope (Hz).
    pub r0: f64,
    /// Grubb's exponent.
    pub alpha: f64,
}

impl Default for BalloonWindkessel {
    fn default() -> Self {
        Self {
            e0: 0.4,
            v0: 4.0,
            te: 0.04,
            epsilon: 0.5,
            nu0: 40.3,
            r0: 25.0,
            alpha: 0.32,
        }
    }
}

impl BalloonWindkessel {
    pub fn k1(&self) -> f64 {
        4.3 * self.nu0 * self.e0 * self.te
    }

    pub fn k2(&self) -> f64 {
        self.epsilon * self.r0 * self.e0 * self.te
    }

    pub fn k3(&self) -> f64 {
        1.0 - self.epsilon
    }

    /// BOLD signal for a normalised inflow `f`.
    pub fn signal(&self, f: f64) -> f64 {
        let f = f.max(1e-6);
        let v = f.powf(self.alpha);
        let extraction = 1.0 - (1.0 - self.e0).powf(1.0 / f);
        let q = v * extraction / self.e0;
        self.v0 * (self.k1() * (1.0 - q) + self.k2() * (1.0 - q / v) + self.k3() * (1.0 - v))
    }
}

/// How the kernel-filtered activity is turned into BOLD.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum BoldReadout {
    /// The convolution itself.
    Linear,
    /// `(conv - 1) * k_1 * V_0`; needs the first-order Volterra kernel.
    Volterra,
    /// Unit-area kernel, inflow `f = 1 + conv` through the static nonlinearity.
    BalloonWindkessel(BalloonWindkessel),
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Bold {
    /// Sampling period in ms (the repetition time).
    pub period: f64,
    /// Support of the haemodynamic response in ms.
    pub hrf_length: f64,
    pub hrf_kernel: HrfKernel,
    pub readout: BoldReadout,
    #[cfg_attr(feature = "serde", serde(default))]
    pub variables_of_interest: Option<Vec<usize>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    inner: BoldBuffers,
}

#[derive(Debug, Clone, Default)]
struct BoldBuffers {
    dt: f64,
    istep: usize,
    interim_istep: usize,
    voi: Vec<usize>,
    interim: Stock,
    stock: Stock,
    hrf: Vec<f64>,
}

impl Default for Bold {
    fn default() -> Self {
        Self {
            period: 2000.0,
            hrf_length: 20_000.0,
            hrf_kernel: HrfKernel::first_order_volterra(),
            readout: BoldReadout::Volterra,
            variables_of_interest: None,
            inner: BoldBuffers::default(),
        }
    }
}

impl Bold {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    pub fn with_hrf_length(mut self, hrf_length: f64) -> Self {
        self.hrf_length = hrf_length;
        self
    }

    pub fn with_kernel(mut self, kernel: HrfKernel, readout: BoldReadout) -> Self {
        self.hrf_kernel = kernel;
        self.readout = readout;
        self
    }

    pub fn with_variables(mut self, voi: Vec<usize>) -> Self {
        self.variables_of_interest = Some(voi);
        self
    }

    /// Sampled kernel, oldest lag last. Empty before configuration.
    pub fn hrf(&self) -> &[f64] {
        &self.inner.hrf
    }

    pub fn stock_steps(&self) -> usize {
        self.inner.stock.len()
    }

    /// HRF-weighted sum of the stock ending at slot `newest`.
    fn convolve(&self, newest: usize) -> State {
        let b = &self.inner;
        let s = b.stock.len();
        let (nvoi, nnode, nmode) = b.stock.shape();
        let mut out = State::zeros(nvoi, nnode, nmode);
        for (lag, h) in b.hrf.iter().enumerate() {
            let slot = b.stock.slot((newest + s - lag) % s);
            out.data_mut()
                .iter_mut()
                .zip(slot)
                .for_each(|(o, x)| *o += h * x);
        }
        out
    }
}

impl Monitor for Bold {
    fn name(&self) -> &'static str {
        "Bold"
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn istep(&self) -> usize {
        self.inner.istep
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()> {
        let istep = compute_istep("Bold", self.period, ctx.dt)?;
        let interim_istep = ((INTERIM_PERIOD / ctx.dt).round() as usize).max(1);
        if istep % interim_istep != 0 {
            return Err(SimError::config(
                Component::Monitor,
                format!(
                    "Bold: period of {istep} steps is not a multiple of the {interim_istep}-step interim period"
                ),
            ));
        }
        if !(self.hrf_length.is_finite() && self.hrf_length > 0.0) {
            return Err(SimError::config(
                Component::Monitor,
                format!("Bold: hrf_length must be finite and > 0, got {}", self.hrf_length),
            ));
        }
        let interim_period = interim_istep as f64 * ctx.dt;
        let stock_steps = ((self.hrf_length / interim_period).ceil() as usize).max(1);

        // Kernel time is in seconds.
        let mut hrf: Vec<f64> = (0..stock_steps)
            .map(|i| self.hrf_kernel.evaluate(i as f64 * interim_period / 1000.0))
            .collect();
        match self.readout {
            BoldReadout::Volterra if self.hrf_kernel.volterra_scale().is_none() => {
                return Err(SimError::config(
                    Component::Monitor,
                    "Bold: Volterra readout needs the first-order Volterra kernel",
                ));
            }
            BoldReadout::BalloonWindkessel(_) => {
                let area: f64 = hrf.iter().sum();
                if area.abs() < 1e-12 {
                    return Err(SimError::config(
                        Component::Monitor,
                        "Bold: kernel has zero area and cannot be normalised",
                    ));
                }
                hrf.iter_mut().for_each(|h| *h /= area);
            }
            _ => {}
        }

        let voi = resolve_voi(
            "Bold",
            self.variables_of_interest.as_deref(),
            Observed::State,
            ctx,
        )?;
        let shape = (voi.len(), ctx.nnode, ctx.nmode);
        let mut interim = Stock::new(interim_istep, shape);
        let mut stock = Stock::new(stock_steps, shape);
        interim.fill_with(&voi, ctx.initial_state);
        stock.fill_with(&voi, ctx.initial_state);
        debug!(istep, interim_istep, stock_steps, "bold monitor stocks allocated");

        self.inner = BoldBuffers {
            dt: ctx.dt,
            istep,
            interim_istep,
            voi,
            interim,
            stock,
            hrf,
        };
        Ok(())
    }

    fn record(&mut self, step: u64, observation: &State) -> Option<Sample> {
        let interim_istep = self.inner.interim_istep as u64;
        let stock_steps = self.inner.stock.len() as u64;
        let newest = ((step / interim_istep) % stock_steps) as usize;
        {
            let b = &mut self.inner;
            b.interim
                .store((step % interim_istep) as usize, &b.voi, observation);
            if step % interim_istep == 0 {
                let mean = b.interim.mean();
                b.stock.store_raw(newest, mean.data());
            }
        }
        if step % self.inner.istep as u64 != 0 {
            return None;
        }

        let mut data = self.convolve(newest);
        match self.readout {
            BoldReadout::Linear => {}
            BoldReadout::Volterra => {
                let scale = self.hrf_kernel.volterra_scale().unwrap_or(1.0);
                data.data_mut().iter_mut().for_each(|c| *c = (*c - 1.0) * scale);
            }
            BoldReadout::BalloonWindkessel(bw) => {
                data.data_mut().iter_mut().for_each(|c| *c = bw.signal(1.0 + *c));
            }
        }
        let time = (step as f64 - self.inner.istep as f64 / 2.0) * self.inner.dt;
        Some(Sample { time, data })
    }
}
