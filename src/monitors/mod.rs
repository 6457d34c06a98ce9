//! Monitors reduce the per-step state into sampled observations.
//!
//! Each monitor converts its `period` to `istep = round(period / dt)` steps
//! and returns `Some(Sample)` from `record` exactly on steps that are a
//! multiple of `istep`. Averaging monitors keep a stock of the last `istep`
//! observations indexed by `step % istep`, so it is reused in place.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Component, Result, SimError};
use crate::state::State;

mod bold;
mod projection;

pub use bold::{BalloonWindkessel, Bold, BoldReadout};
pub use projection::{EegReference, Projection, ProjectionKind};

/// What a monitor is fed every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Observed {
    /// The integrated state `(nvar, nnode, nmode)`.
    #[default]
    State,
    /// The afferent long-range coupling `(ncvar, nnode, nmode)`.
    Coupling,
}

/// One monitor output.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// Physical time in ms.
    pub time: f64,
    pub data: State,
}

/// Simulation facts a monitor needs to size itself.
#[derive(Debug, Clone, Copy)]
pub struct MonitorContext<'a> {
    pub dt: f64,
    pub nvar: usize,
    pub nnode: usize,
    pub nmode: usize,
    pub cvar: &'a [usize],
    pub variables_of_interest: &'a [usize],
    /// Vertex to region map when simulating on a surface.
    pub region_mapping: Option<&'a [usize]>,
    pub nregion: usize,
    /// State at the start of the run, used to prime stocks.
    pub initial_state: &'a State,
}

pub trait Monitor: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// Sampling period in ms.
    fn period(&self) -> f64;

    /// Sampling period in integration steps; valid after `config_for_sim`.
    fn istep(&self) -> usize;

    fn observed(&self) -> Observed {
        Observed::State
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()>;

    /// Feed the observation produced by `step`.
    fn record(&mut self, step: u64, observation: &State) -> Option<Sample>;
}

/// `round(period / dt)`, rejecting periods shorter than half a step.
pub(crate) fn compute_istep(name: &str, period: f64, dt: f64) -> Result<usize> {
    if !(period.is_finite() && period > 0.0) {
        return Err(SimError::config(
            Component::Monitor,
            format!("{name}: period must be finite and > 0, got {period}"),
        ));
    }
    let ratio = period / dt;
    let istep = ratio.round();
    if istep < 1.0 {
        return Err(SimError::config(
            Component::Monitor,
            format!("{name}: period {period} ms is shorter than the integration step {dt} ms"),
        ));
    }
    if (ratio - istep).abs() > 1e-6 * ratio {
        warn!(
            monitor = name,
            period, dt, istep, "monitor period is not an integer multiple of dt; rounding"
        );
    }
    debug!(monitor = name, istep, "monitor configured");
    Ok(istep as usize)
}

/// Explicit variable selection, or the default for what is observed.
pub(crate) fn resolve_voi(
    name: &str,
    explicit: Option<&[usize]>,
    observed: Observed,
    ctx: &MonitorContext<'_>,
) -> Result<Vec<usize>> {
    let (available, default): (usize, Vec<usize>) = match observed {
        Observed::State => (ctx.nvar, ctx.variables_of_interest.to_vec()),
        Observed::Coupling => (ctx.cvar.len(), (0..ctx.cvar.len()).collect()),
    };
    let voi = explicit.map(<[usize]>::to_vec).unwrap_or(default);
    if voi.is_empty() {
        return Err(SimError::config(
            Component::Monitor,
            format!("{name}: no variables of interest"),
        ));
    }
    if let Some(bad) = voi.iter().find(|&&v| v >= available) {
        return Err(SimError::config(
            Component::Monitor,
            format!("{name}: variable {bad} out of range for {available} observed variables"),
        ));
    }
    Ok(voi)
}

#[inline]
fn step_time(step: u64, dt: f64) -> f64 {
    step as f64 * dt
}

/// Circular stock of `istep` selected-variable snapshots.
#[derive(Debug, Clone, Default)]
pub(crate) struct Stock {
    len: usize,
    shape: (usize, usize, usize),
    data: Vec<f64>,
}

impl Stock {
    pub(crate) fn new(len: usize, shape: (usize, usize, usize)) -> Self {
        Self {
            len,
            shape,
            data: vec![0.0; len * shape.0 * shape.1 * shape.2],
        }
    }

    #[inline]
    fn slot_len(&self) -> usize {
        self.shape.0 * self.shape.1 * self.shape.2
    }

    /// Write the `voi` rows of `x` into `slot`.
    pub(crate) fn store(&mut self, slot: usize, voi: &[usize], x: &State) {
        let per_var = self.shape.1 * self.shape.2;
        let base = slot * self.slot_len();
        for (row, &v) in voi.iter().enumerate() {
            let dst = base + row * per_var;
            self.data[dst..dst + per_var].copy_from_slice(x.var(v));
        }
    }

    /// Write a precomputed snapshot into `slot`.
    pub(crate) fn store_raw(&mut self, slot: usize, values: &[f64]) {
        let len = self.slot_len();
        self.data[slot * len..(slot + 1) * len].copy_from_slice(values);
    }

    pub(crate) fn fill_with(&mut self, voi: &[usize], x: &State) {
        for slot in 0..self.len {
            self.store(slot, voi, x);
        }
    }

    pub(crate) fn mean(&self) -> State {
        let mut out = State::zeros(self.shape.0, self.shape.1, self.shape.2);
        for slot in 0..self.len {
            out.data_mut()
                .iter_mut()
                .zip(self.slot(slot))
                .for_each(|(o, v)| *o += v);
        }
        let n = self.len.max(1) as f64;
        out.data_mut().iter_mut().for_each(|o| *o /= n);
        out
    }

    pub(crate) fn slot(&self, slot: usize) -> &[f64] {
        let len = self.slot_len();
        &self.data[slot * len..(slot + 1) * len]
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }
}

/// Every variable at every step.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Raw {
    #[cfg_attr(feature = "serde", serde(skip))]
    dt: f64,
}

impl Raw {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Monitor for Raw {
    fn name(&self) -> &'static str {
        "Raw"
    }

    fn period(&self) -> f64 {
        self.dt
    }

    fn istep(&self) -> usize {
        1
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()> {
        self.dt = ctx.dt;
        Ok(())
    }

    fn record(&mut self, step: u64, observation: &State) -> Option<Sample> {
        Some(Sample {
            time: step_time(step, self.dt),
            data: observation.clone(),
        })
    }
}

/// Instantaneous snapshot of the variables of interest every `istep` steps.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubSample {
    pub period: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub variables_of_interest: Option<Vec<usize>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub observe: Observed,
    #[cfg_attr(feature = "serde", serde(skip))]
    istep: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    dt: f64,
    #[cfg_attr(feature = "serde", serde(skip))]
    voi: Vec<usize>,
}

impl SubSample {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            variables_of_interest: None,
            observe: Observed::State,
            istep: 0,
            dt: 0.0,
            voi: Vec::new(),
        }
    }

    /// Sub-sampled afferent coupling instead of the state.
    pub fn afferent_coupling(period: f64) -> Self {
        Self {
            observe: Observed::Coupling,
            ..Self::new(period)
        }
    }

    pub fn with_variables(mut self, voi: Vec<usize>) -> Self {
        self.variables_of_interest = Some(voi);
        self
    }
}

impl Monitor for SubSample {
    fn name(&self) -> &'static str {
        match self.observe {
            Observed::State => "SubSample",
            Observed::Coupling => "AfferentCoupling",
        }
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn istep(&self) -> usize {
        self.istep
    }

    fn observed(&self) -> Observed {
        self.observe
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()> {
        self.istep = compute_istep(self.name(), self.period, ctx.dt)?;
        self.voi = resolve_voi(
            self.name(),
            self.variables_of_interest.as_deref(),
            self.observe,
            ctx,
        )?;
        self.dt = ctx.dt;
        Ok(())
    }

    fn record(&mut self, step: u64, observation: &State) -> Option<Sample> {
        if step % self.istep as u64 != 0 {
            return None;
        }
        Some(Sample {
            time: step_time(step, self.dt),
            data: observation.select_vars(&self.voi),
        })
    }
}

/// Mean of the variables of interest over each sampling period, time-stamped
/// at the middle of the period.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemporalAverage {
    pub period: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub variables_of_interest: Option<Vec<usize>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub observe: Observed,
    #[cfg_attr(feature = "serde", serde(skip))]
    istep: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    dt: f64,
    #[cfg_attr(feature = "serde", serde(skip))]
    voi: Vec<usize>,
    #[cfg_attr(feature = "serde", serde(skip))]
    stock: Stock,
}

impl TemporalAverage {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            variables_of_interest: None,
            observe: Observed::State,
            istep: 0,
            dt: 0.0,
            voi: Vec::new(),
            stock: Stock::default(),
        }
    }

    /// Period-averaged afferent coupling instead of the state.
    pub fn afferent_coupling(period: f64) -> Self {
        Self {
            observe: Observed::Coupling,
            ..Self::new(period)
        }
    }

    pub fn with_variables(mut self, voi: Vec<usize>) -> Self {
        self.variables_of_interest = Some(voi);
        self
    }

    pub(crate) fn voi(&self) -> &[usize] {
        &self.voi
    }

    /// Average of the period ending at `step`, if `step` closes one.
    pub(crate) fn accumulate(&mut self, step: u64, observation: &State) -> Option<(f64, State)> {
        let istep = self.istep as u64;
        self.stock.store((step % istep) as usize, &self.voi, observation);
        if step % istep != 0 {
            return None;
        }
        let time = (step as f64 - self.istep as f64 / 2.0) * self.dt;
        Some((time, self.stock.mean()))
    }
}

impl Monitor for TemporalAverage {
    fn name(&self) -> &'static str {
        match self.observe {
            Observed::State => "TemporalAverage",
            Observed::Coupling => "AfferentCouplingTemporalAverage",
        }
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn istep(&self) -> usize {
        self.istep
    }

    fn observed(&self) -> Observed {
        self.observe
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()> {
        self.istep = compute_istep(self.name(), self.period, ctx.dt)?;
        self.voi = resolve_voi(
            self.name(),
            self.variables_of_interest.as_deref(),
            self.observe,
            ctx,
        )?;
        self.dt = ctx.dt;
        self.stock = Stock::new(self.istep, (self.voi.len(), ctx.nnode, ctx.nmode));
        Ok(())
    }

    fn record(&mut self, step: u64, observation: &State) -> Option<Sample> {
        self.accumulate(step, observation)
            .map(|(time, data)| Sample { time, data })
    }
}

/// How nodes are grouped by `SpatialAverage`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SpatialMask {
    /// Surface vertices grouped by region; a single group for region-level runs.
    #[default]
    RegionMapping,
    /// One group holding every node.
    Global,
    /// Explicit group index per node.
    Custom(Vec<usize>),
}

/// Sub-sampled mean of the variables of interest over groups of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialAverage {
    pub period: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub mask: SpatialMask,
    #[cfg_attr(feature = "serde", serde(default))]
    pub variables_of_interest: Option<Vec<usize>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    istep: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    dt: f64,
    #[cfg_attr(feature = "serde", serde(skip))]
    voi: Vec<usize>,
    #[cfg_attr(feature = "serde", serde(skip))]
    groups: Vec<usize>,
    #[cfg_attr(feature = "serde", serde(skip))]
    group_sizes: Vec<usize>,
}

impl SpatialAverage {
    pub fn new(period: f64, mask: SpatialMask) -> Self {
        Self {
            period,
            mask,
            variables_of_interest: None,
            istep: 0,
            dt: 0.0,
            voi: Vec::new(),
            groups: Vec::new(),
            group_sizes: Vec::new(),
        }
    }

    /// Mean over the whole network.
    pub fn global(period: f64) -> Self {
        Self::new(period, SpatialMask::Global)
    }

    pub fn number_of_groups(&self) -> usize {
        self.group_sizes.len()
    }
}

impl Monitor for SpatialAverage {
    fn name(&self) -> &'static str {
        match self.mask {
            SpatialMask::Global => "GlobalAverage",
            _ => "SpatialAverage",
        }
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn istep(&self) -> usize {
        self.istep
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()> {
        self.istep = compute_istep(self.name(), self.period, ctx.dt)?;
        self.voi = resolve_voi(
            self.name(),
            self.variables_of_interest.as_deref(),
            Observed::State,
            ctx,
        )?;
        self.dt = ctx.dt;
        self.groups = match (&self.mask, ctx.region_mapping) {
            (SpatialMask::Custom(mask), _) => mask.clone(),
            (SpatialMask::RegionMapping, Some(mapping)) => mapping.to_vec(),
            (SpatialMask::RegionMapping, None) | (SpatialMask::Global, _) => vec![0; ctx.nnode],
        };
        if self.groups.len() != ctx.nnode {
            return Err(SimError::config(
                Component::Monitor,
                format!(
                    "{}: mask has {} entries, simulation has {} nodes",
                    self.name(),
                    self.groups.len(),
                    ctx.nnode
                ),
            ));
        }
        let ngroups = self.groups.iter().max().map_or(0, |m| m + 1);
        let mut sizes = vec![0usize; ngroups];
        for &g in &self.groups {
            sizes[g] += 1;
        }
        if let Some(empty) = sizes.iter().position(|&s| s == 0) {
            return Err(SimError::config(
                Component::Monitor,
                format!("{}: mask group {empty} has no nodes", self.name()),
            ));
        }
        self.group_sizes = sizes;
        Ok(())
    }

    fn record(&mut self, step: u64, observation: &State) -> Option<Sample> {
        if step % self.istep as u64 != 0 {
            return None;
        }
        let m = observation.nmode();
        let mut out = State::zeros(self.voi.len(), self.group_sizes.len(), m);
        for (row, &v) in self.voi.iter().enumerate() {
            for (node, &g) in self.groups.iter().enumerate() {
                for mode in 0..m {
                    let acc = out.get(row, g, mode) + observation.get(v, node, mode);
                    out.set(row, g, mode, acc);
                }
            }
            for (g, &size) in self.group_sizes.iter().enumerate() {
                for mode in 0..m {
                    let mean = out.get(row, g, mode) / size as f64;
                    out.set(row, g, mode, mean);
                }
            }
        }
        Some(Sample {
            time: step_time(step, self.dt),
            data: out,
        })
    }
}
