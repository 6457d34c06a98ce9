//! Integration schemes.
//!
//! Every scheme advances the state in place by one `dt`. The long-range
//! coupling is held fixed across the stages of a step; local coupling is
//! recomputed for every stage state. Model boundaries and clamped variables
//! are enforced on each intermediate stage and on the result.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Component, Result, SimError};
use crate::models::Model;
use crate::noise::Noise;
use crate::state::State;
use crate::surface::LocalConnectivity;

/// Derivative function with the coupling for the current step bound in.
pub struct Dfun<'a> {
    model: &'a dyn Model,
    coupling: &'a State,
    local: Option<&'a LocalConnectivity>,
    lc: &'a mut State,
}

impl<'a> Dfun<'a> {
    /// `lc` is scratch with the state's shape; it stays zero without a local operator.
    pub fn new(
        model: &'a dyn Model,
        coupling: &'a State,
        local: Option<&'a LocalConnectivity>,
        lc: &'a mut State,
    ) -> Self {
        if local.is_none() {
            lc.fill(0.0);
        }
        Self {
            model,
            coupling,
            local,
            lc,
        }
    }

    pub fn eval(&mut self, x: &State, dx: &mut State) {
        if let Some(local) = self.local {
            local.apply(x, &mut *self.lc);
        }
        self.model.dfun(x, self.coupling, &*self.lc, dx);
    }
}

pub trait Integrator: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    fn base(&self) -> &IntegratorBase;

    fn base_mut(&mut self) -> &mut IntegratorBase;

    #[inline]
    fn dt(&self) -> f64 {
        self.base().dt
    }

    /// Allocate stage buffers and configure the noise source, if any.
    fn configure(&mut self, model: &dyn Model, nnode: usize) -> Result<()> {
        self.base_mut().configure(model, nnode)?;
        let dt = self.dt();
        if let Some(noise) = self.noise_mut() {
            noise.configure(dt, model.nvar(), nnode, model.number_of_modes())?;
        }
        Ok(())
    }

    /// Advance `x` by one step. `stimulus`, when present, has the state's shape.
    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>);

    fn noise(&self) -> Option<&Noise> {
        None
    }

    fn noise_mut(&mut self) -> Option<&mut Noise> {
        None
    }

    fn is_stochastic(&self) -> bool {
        self.noise().is_some()
    }
}

/// Step size, bounds and the stage buffers shared by all schemes.
#[derive(Debug, Clone)]
pub struct IntegratorBase {
    pub dt: f64,
    /// Variables pinned to a fixed value after every stage.
    pub clamp: Vec<(usize, f64)>,
    bounds: Vec<(usize, (f64, f64))>,
    k: [State; 4],
    inter: State,
    dw: State,
    g: State,
}

impl IntegratorBase {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            clamp: Vec::new(),
            bounds: Vec::new(),
            k: core::array::from_fn(|_| State::zeros(0, 0, 0)),
            inter: State::zeros(0, 0, 0),
            dw: State::zeros(0, 0, 0),
            g: State::zeros(0, 0, 0),
        }
    }

    pub fn configure(&mut self, model: &dyn Model, nnode: usize) -> Result<()> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(SimError::config(
                Component::Integrator,
                format!("dt must be finite and > 0, got {}", self.dt),
            ));
        }
        let nvar = model.nvar();
        if let Some((var, _)) = self.clamp.iter().find(|(v, _)| *v >= nvar) {
            return Err(SimError::config(
                Component::Integrator,
                format!("clamped variable {var} out of range for {nvar} state variables"),
            ));
        }
        self.bounds = model.state_variable_boundaries();
        let shape = (nvar, nnode, model.number_of_modes());
        let alloc = || State::zeros(shape.0, shape.1, shape.2);
        self.k = core::array::from_fn(|_| alloc());
        self.inter = alloc();
        self.dw = alloc();
        self.g = alloc();
        Ok(())
    }

    pub fn bounds(&self) -> &[(usize, (f64, f64))] {
        &self.bounds
    }
}

fn bound_and_clamp(bounds: &[(usize, (f64, f64))], clamp: &[(usize, f64)], x: &mut State) {
    for &(var, (lo, hi)) in bounds {
        x.var_mut(var).iter_mut().for_each(|v| *v = v.clamp(lo, hi));
    }
    for &(var, value) in clamp {
        x.var_mut(var).iter_mut().for_each(|v| *v = value);
    }
}

/// `out = x + a * y`
#[inline]
fn axpy_into(out: &mut State, x: &State, a: f64, y: &State) {
    for ((o, &xv), &yv) in out.data_mut().iter_mut().zip(x.data()).zip(y.data()) {
        *o = xv + a * yv;
    }
}

/// `x += a * y`
#[inline]
fn axpy(x: &mut State, a: f64, y: &State) {
    for (xv, &yv) in x.data_mut().iter_mut().zip(y.data()) {
        *xv += a * yv;
    }
}

/// `x += g * dw`
#[inline]
fn add_noise(x: &mut State, g: &State, dw: &State) {
    for ((xv, &gv), &wv) in x.data_mut().iter_mut().zip(g.data()).zip(dw.data()) {
        *xv += gv * wv;
    }
}

#[inline]
fn add_stimulus(x: &mut State, dt: f64, stimulus: Option<&State>) {
    if let Some(stim) = stimulus {
        axpy(x, dt, stim);
    }
}

macro_rules! base_accessors {
    () => {
        fn base(&self) -> &IntegratorBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut IntegratorBase {
            &mut self.base
        }
    };
}

macro_rules! noise_accessors {
    () => {
        fn noise(&self) -> Option<&Noise> {
            Some(&self.noise)
        }

        fn noise_mut(&mut self) -> Option<&mut Noise> {
            Some(&mut self.noise)
        }
    };
}

/// `X' = X + dt * (f(X) + stim)`
#[derive(Debug, Clone)]
pub struct EulerDeterministic {
    pub base: IntegratorBase,
}

impl EulerDeterministic {
    pub fn new(dt: f64) -> Self {
        Self {
            base: IntegratorBase::new(dt),
        }
    }
}

impl Integrator for EulerDeterministic {
    fn name(&self) -> &'static str {
        "EulerDeterministic"
    }

    base_accessors!();

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        let b = &mut self.base;
        dfun.eval(x, &mut b.k[0]);
        axpy(x, b.dt, &b.k[0]);
        add_stimulus(x, b.dt, stimulus);
        bound_and_clamp(&b.bounds, &b.clamp, x);
    }
}

/// `X' = X + dt * (f(X) + stim) + g(X) * dW`
#[derive(Debug, Clone)]
pub struct EulerStochastic {
    pub base: IntegratorBase,
    pub noise: Noise,
}

impl EulerStochastic {
    pub fn new(dt: f64, noise: Noise) -> Self {
        Self {
            base: IntegratorBase::new(dt),
            noise,
        }
    }
}

impl Integrator for EulerStochastic {
    fn name(&self) -> &'static str {
        "EulerStochastic"
    }

    base_accessors!();
    noise_accessors!();

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        let b = &mut self.base;
        self.noise.generate(&mut b.dw);
        self.noise.gfun(x, &mut b.g);
        dfun.eval(x, &mut b.k[0]);
        axpy(x, b.dt, &b.k[0]);
        add_stimulus(x, b.dt, stimulus);
        add_noise(x, &b.g, &b.dw);
        bound_and_clamp(&b.bounds, &b.clamp, x);
    }
}

/// Second order predictor-corrector.
#[derive(Debug, Clone)]
pub struct HeunDeterministic {
    pub base: IntegratorBase,
}

impl HeunDeterministic {
    pub fn new(dt: f64) -> Self {
        Self {
            base: IntegratorBase::new(dt),
        }
    }
}

impl Integrator for HeunDeterministic {
    fn name(&self) -> &'static str {
        "HeunDeterministic"
    }

    base_accessors!();

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        let b = &mut self.base;
        let dt = b.dt;
        dfun.eval(x, &mut b.k[0]);
        axpy_into(&mut b.inter, x, dt, &b.k[0]);
        add_stimulus(&mut b.inter, dt, stimulus);
        bound_and_clamp(&b.bounds, &b.clamp, &mut b.inter);

        dfun.eval(&b.inter, &mut b.k[1]);
        axpy(x, dt / 2.0, &b.k[0]);
        axpy(x, dt / 2.0, &b.k[1]);
        add_stimulus(x, dt, stimulus);
        bound_and_clamp(&b.bounds, &b.clamp, x);
    }
}

/// Stochastic Heun with independent predictor and corrector draws.
///
/// The predictor uses `g(X) * dW1`; the result adds
/// `(g(X) * dW1 + g(X~) * dW2) / sqrt(2)`, which keeps the additive-noise
/// variance at `g^2 * dt`.
#[derive(Debug, Clone)]
pub struct HeunStochastic {
    pub base: IntegratorBase,
    pub noise: Noise,
    dw2: State,
    g2: State,
}

impl HeunStochastic {
    pub fn new(dt: f64, noise: Noise) -> Self {
        Self {
            base: IntegratorBase::new(dt),
            noise,
            dw2: State::zeros(0, 0, 0),
            g2: State::zeros(0, 0, 0),
        }
    }
}

impl Integrator for HeunStochastic {
    fn name(&self) -> &'static str {
        "HeunStochastic"
    }

    base_accessors!();
    noise_accessors!();

    fn configure(&mut self, model: &dyn Model, nnode: usize) -> Result<()> {
        self.base.configure(model, nnode)?;
        let nmode = model.number_of_modes();
        self.noise.configure(self.base.dt, model.nvar(), nnode, nmode)?;
        self.dw2 = State::zeros(model.nvar(), nnode, nmode);
        self.g2 = State::zeros(model.nvar(), nnode, nmode);
        Ok(())
    }

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        let b = &mut self.base;
        let dt = b.dt;
        self.noise.generate(&mut b.dw);
        self.noise.generate(&mut self.dw2);
        self.noise.gfun(x, &mut b.g);

        dfun.eval(x, &mut b.k[0]);
        axpy_into(&mut b.inter, x, dt, &b.k[0]);
        add_stimulus(&mut b.inter, dt, stimulus);
        add_noise(&mut b.inter, &b.g, &b.dw);
        bound_and_clamp(&b.bounds, &b.clamp, &mut b.inter);

        self.noise.gfun(&b.inter, &mut self.g2);
        dfun.eval(&b.inter, &mut b.k[1]);

        let scale = core::f64::consts::FRAC_1_SQRT_2;
        for (i, xv) in x.data_mut().iter_mut().enumerate() {
            let drift = dt / 2.0 * (b.k[0].data()[i] + b.k[1].data()[i]);
            let diffusion = scale
                * (b.g.data()[i] * b.dw.data()[i] + self.g2.data()[i] * self.dw2.data()[i]);
            *xv += drift + diffusion;
        }
        add_stimulus(x, dt, stimulus);
        bound_and_clamp(&b.bounds, &b.clamp, x);
    }
}

fn rk4_stages(b: &mut IntegratorBase, x: &State, dfun: &mut Dfun<'_>) {
    let dt = b.dt;
    dfun.eval(x, &mut b.k[0]);

    axpy_into(&mut b.inter, x, dt / 2.0, &b.k[0]);
    bound_and_clamp(&b.bounds, &b.clamp, &mut b.inter);
    dfun.eval(&b.inter, &mut b.k[1]);

    axpy_into(&mut b.inter, x, dt / 2.0, &b.k[1]);
    bound_and_clamp(&b.bounds, &b.clamp, &mut b.inter);
    dfun.eval(&b.inter, &mut b.k[2]);

    axpy_into(&mut b.inter, x, dt, &b.k[2]);
    bound_and_clamp(&b.bounds, &b.clamp, &mut b.inter);
    dfun.eval(&b.inter, &mut b.k[3]);
}

fn rk4_combine(b: &IntegratorBase, x: &mut State) {
    let dt6 = b.dt / 6.0;
    let [k1, k2, k3, k4] = &b.k;
    for (i, xv) in x.data_mut().iter_mut().enumerate() {
        *xv += dt6 * (k1.data()[i] + 2.0 * k2.data()[i] + 2.0 * k3.data()[i] + k4.data()[i]);
    }
}

/// Classical fourth order Runge-Kutta.
#[derive(Debug, Clone)]
pub struct RungeKutta4thOrderDeterministic {
    pub base: IntegratorBase,
}

impl RungeKutta4thOrderDeterministic {
    pub fn new(dt: f64) -> Self {
        Self {
            base: IntegratorBase::new(dt),
        }
    }
}

impl Integrator for RungeKutta4thOrderDeterministic {
    fn name(&self) -> &'static str {
        "RungeKutta4thOrderDeterministic"
    }

    base_accessors!();

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        rk4_stages(&mut self.base, x, dfun);
        rk4_combine(&self.base, x);
        add_stimulus(x, self.base.dt, stimulus);
        bound_and_clamp(&self.base.bounds, &self.base.clamp, x);
    }
}

/// RK4 drift with a single `g(X) * dW` draw per step.
#[derive(Debug, Clone)]
pub struct RungeKutta4thOrderStochastic {
    pub base: IntegratorBase,
    pub noise: Noise,
}

impl RungeKutta4thOrderStochastic {
    pub fn new(dt: f64, noise: Noise) -> Self {
        Self {
            base: IntegratorBase::new(dt),
            noise,
        }
    }
}

impl Integrator for RungeKutta4thOrderStochastic {
    fn name(&self) -> &'static str {
        "RungeKutta4thOrderStochastic"
    }

    base_accessors!();
    noise_accessors!();

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        self.noise.generate(&mut self.base.dw);
        self.noise.gfun(x, &mut self.base.g);
        rk4_stages(&mut self.base, x, dfun);
        rk4_combine(&self.base, x);
        add_stimulus(x, self.base.dt, stimulus);
        add_noise(x, &self.base.g, &self.base.dw);
        bound_and_clamp(&self.base.bounds, &self.base.clamp, x);
    }
}

/// Treats the model as a map: `X' = f(X) + stim`.
#[derive(Debug, Clone)]
pub struct Identity {
    pub base: IntegratorBase,
}

impl Identity {
    pub fn new(dt: f64) -> Self {
        Self {
            base: IntegratorBase::new(dt),
        }
    }
}

impl Integrator for Identity {
    fn name(&self) -> &'static str {
        "Identity"
    }

    base_accessors!();

    fn scheme(&mut self, x: &mut State, dfun: &mut Dfun<'_>, stimulus: Option<&State>) {
        let b = &mut self.base;
        dfun.eval(x, &mut b.k[0]);
        x.copy_from(&b.k[0]);
        if let Some(stim) = stimulus {
            axpy(x, 1.0, stim);
        }
        bound_and_clamp(&b.bounds, &b.clamp, x);
    }
}

/// Scheme names accepted by [`IntegratorSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Scheme {
    EulerDeterministic,
    EulerStochastic,
    HeunDeterministic,
    HeunStochastic,
    RungeKutta4thOrderDeterministic,
    RungeKutta4thOrderStochastic,
    Identity,
}

impl Scheme {
    pub fn is_stochastic(self) -> bool {
        matches!(
            self,
            Scheme::EulerStochastic | Scheme::HeunStochastic | Scheme::RungeKutta4thOrderStochastic
        )
    }
}

/// Declarative integrator description.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntegratorSpec {
    pub scheme: Scheme,
    pub dt: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub noise: Option<crate::noise::NoiseConfig>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub clamp: Vec<(usize, f64)>,
}

impl IntegratorSpec {
    pub fn build(&self) -> Result<Box<dyn Integrator>> {
        let noise = match (&self.noise, self.scheme.is_stochastic()) {
            (Some(cfg), true) => Some(Noise::new(cfg.clone())),
            (None, true) => {
                return Err(SimError::config(
                    Component::Integrator,
                    format!("{:?} needs a noise configuration", self.scheme),
                ))
            }
            (Some(_), false) => {
                return Err(SimError::config(
                    Component::Integrator,
                    format!("{:?} is deterministic but a noise configuration was given", self.scheme),
                ))
            }
            (None, false) => None,
        };
        let dt = self.dt;
        let mut integrator: Box<dyn Integrator> = match (self.scheme, noise) {
            (Scheme::EulerDeterministic, _) => Box::new(EulerDeterministic::new(dt)),
            (Scheme::HeunDeterministic, _) => Box::new(HeunDeterministic::new(dt)),
            (Scheme::RungeKutta4thOrderDeterministic, _) => {
                Box::new(RungeKutta4thOrderDeterministic::new(dt))
            }
            (Scheme::Identity, _) => Box::new(Identity::new(dt)),
            (Scheme::EulerStochastic, Some(n)) => Box::new(EulerStochastic::new(dt, n)),
            (Scheme::HeunStochastic, Some(n)) => Box::new(HeunStochastic::new(dt, n)),
            (Scheme::RungeKutta4thOrderStochastic, Some(n)) => {
                Box::new(RungeKutta4thOrderStochastic::new(dt, n))
            }
            (scheme, None) => {
                return Err(SimError::config(
                    Component::Integrator,
                    format!("{scheme:?} needs a noise configuration"),
                ))
            }
        };
        integrator.base_mut().clamp = self.clamp.clone();
        Ok(integrator)
    }
}
