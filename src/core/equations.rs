//! Closed-form functions of time or distance used by stimuli, local
//! connectivity kernels and the BOLD haemodynamic response.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use core::f64::consts::{PI, TAU};

/// `amp * exp(-(x - midpoint)^2 / (2 sigma^2)) + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Gaussian {
    pub amp: f64,
    pub midpoint: f64,
    pub sigma: f64,
    pub offset: f64,
}

impl Default for Gaussian {
    fn default() -> Self {
        Self {
            amp: 1.0,
            midpoint: 0.0,
            sigma: 1.0,
            offset: 0.0,
        }
    }
}

impl Gaussian {
    #[inline]
    pub fn evaluate(&self, x: f64) -> f64 {
        let d = x - self.midpoint;
        self.amp * (-(d * d) / (2.0 * self.sigma * self.sigma)).exp() + self.offset
    }
}

/// Temporal profile of a stimulus. Time is in ms.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum TemporalEquation {
    /// `amp` for `tau` ms of every `period`, starting after `onset`.
    PulseTrain {
        onset: f64,
        period: f64,
        tau: f64,
        amp: f64,
    },
    /// `amp * sin(2 pi frequency t)`, `frequency` in kHz.
    Sinusoid { amp: f64, frequency: f64 },
    Gaussian(Gaussian),
    /// `a * t + b`
    Linear { a: f64, b: f64 },
}

impl Default for TemporalEquation {
    fn default() -> Self {
        TemporalEquation::PulseTrain {
            onset: 30.0,
            period: 42.0,
            tau: 13.0,
            amp: 1.0,
        }
    }
}

impl TemporalEquation {
    pub fn evaluate(&self, t: f64) -> f64 {
        match *self {
            TemporalEquation::PulseTrain {
                onset,
                period,
                tau,
                amp,
            } => {
                if t > onset && (t - onset).rem_euclid(period) < tau {
                    amp
                } else {
                    0.0
                }
            }
            TemporalEquation::Sinusoid { amp, frequency } => amp * (TAU * frequency * t).sin(),
            TemporalEquation::Gaussian(g) => g.evaluate(t),
            TemporalEquation::Linear { a, b } => a * t + b,
        }
    }
}

/// Haemodynamic response kernels. Time is in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum HrfKernel {
    FirstOrderVolterra {
        tau_s: f64,
        tau_f: f64,
        k_1: f64,
        v_0: f64,
    },
    Gamma {
        tau: f64,
        n: f64,
        a: f64,
    },
    DoubleExponential {
        amp_1: f64,
        amp_2: f64,
        tau_1: f64,
        tau_2: f64,
        f_1: f64,
        f_2: f64,
    },
    MixtureOfGammas {
        a_1: f64,
        a_2: f64,
        l: f64,
        c: f64,
    },
}

impl HrfKernel {
    pub fn first_order_volterra() -> Self {
        HrfKernel::FirstOrderVolterra {
            tau_s: 0.8,
            tau_f: 0.4,
            k_1: 5.6,
            v_0: 0.02,
        }
    }

    pub fn gamma() -> Self {
        HrfKernel::Gamma {
            tau: 1.08,
            n: 3.0,
            a: 0.1,
        }
    }

    pub fn double_exponential() -> Self {
        HrfKernel::DoubleExponential {
            amp_1: 0.1,
            amp_2: 0.1,
            tau_1: 7.22,
            tau_2: 7.4,
            f_1: 0.03,
            f_2: 0.12,
        }
    }

    pub fn mixture_of_gammas() -> Self {
        HrfKernel::MixtureOfGammas {
            a_1: 6.0,
            a_2: 13.0,
            l: 1.0,
            c: 0.4,
        }
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        match *self {
            HrfKernel::FirstOrderVolterra { tau_s, tau_f, .. } => {
                let omega = (1.0 / tau_f - 1.0 / (4.0 * tau_s * tau_s)).sqrt();
                1.0 / 3.0 * (-0.5 * (t / tau_s)).exp() * (omega * t).sin() / omega
            }
            HrfKernel::Gamma { tau, n, .. } => {
                let x = t / tau;
                x.powf(n - 1.0) * (-x).exp() / (gamma_fn(n) * tau)
            }
            HrfKernel::DoubleExponential {
                amp_1,
                amp_2,
                tau_1,
                tau_2,
                f_1,
                f_2,
            } => {
                amp_1 * (-t / (2.0 * tau_1)).exp() * (2.0 * PI * f_1 * t).sin()
                    - amp_2 * (-t / (2.0 * tau_2)).exp() * (2.0 * PI * f_2 * t).sin()
            }
            HrfKernel::MixtureOfGammas { a_1, a_2, l, c } => {
                let x = l * t;
                x.powf(a_1 - 1.0) * (-x).exp() / gamma_fn(a_1)
                    - c * x.powf(a_2 - 1.0) * (-x).exp() / gamma_fn(a_2)
            }
        }
    }

    /// `k_1 * V_0` scale of the Volterra readout.
    pub fn volterra_scale(&self) -> Option<f64> {
        match *self {
            HrfKernel::FirstOrderVolterra { k_1, v_0, .. } => Some(k_1 * v_0),
            _ => None,
        }
    }
}

/// Gamma function (Lanczos, g = 7).
pub fn gamma_fn(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        return PI / ((PI * x).sin() * gamma_fn(1.0 - x));
    }
    let x = x - 1.0;
    let mut acc = COEF[0];
    for (i, c) in COEF.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * acc
}
