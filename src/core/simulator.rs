//! The simulation loop.
//!
//! `Simulator` wires a model, a connectome, a coupling function, an
//! integrator, optional stimulus/surface and a set of monitors into one
//! stepping state machine:
//!
//! ```text
//! unconfigured --configure()--> ready --step()/run(n)--> ready (continuable)
//! ```
//!
//! Step `s` advances the state of step `s - 1`: it gathers delayed coupling
//! variables from the history, applies the coupling, integrates, writes the
//! new coupling variables to slot `s mod horizon` and feeds the monitors.

#[cfg(feature = "std")]
use std::io::{self, Read, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::coupling::Coupling;
use crate::error::{Component, Result, SimError};
use crate::history::History;
use crate::integrators::{Dfun, Integrator};
use crate::models::Model;
use crate::monitors::{Monitor, MonitorContext, Observed, Sample};
use crate::noise::NoiseState;
use crate::prng::Prng;
use crate::state::{DelayedState, State};
use crate::stimulus::Stimulus;
#[cfg(feature = "std")]
use crate::storage;
use crate::surface::Surface;

/// Execution tier for the delayed gather and the coupling reduction.
///
/// - `Scalar`: single-threaded (default, works everywhere)
/// - `Parallel`: one rayon task per target node (requires `parallel` feature)
///
/// Per-target work is independent, so both tiers produce identical numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    #[default]
    Scalar,
    Parallel,
}

/// Monitor outputs of one step; one entry per monitor, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub step: u64,
    pub samples: Vec<Option<Sample>>,
}

/// Samples collected from one monitor.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeSeries {
    pub monitor: String,
    pub times: Vec<f64>,
    pub data: Vec<State>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Snapshot of simulator size and progress.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostics {
    /// Integration nodes (regions, or vertices on a surface).
    pub node_count: usize,
    pub region_count: usize,
    pub state_variables: usize,
    pub coupling_variables: usize,
    pub modes: usize,
    /// History depth in steps.
    pub horizon: usize,
    /// Non-zero entries of the weights matrix.
    pub connection_count: usize,
    pub current_step: u64,
    /// Current time in ms.
    pub current_time: f64,
    /// Estimated memory held by state, history and scratch buffers.
    pub memory_bytes: usize,
    pub execution_tier: ExecutionTier,
}

/// Everything needed to continue a run bit-for-bit.
///
/// Monitor stocks are not included; checkpoint on a step that closes every
/// averaging monitor's period to get identical monitor output after restore.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Checkpoint {
    pub current_step: u64,
    pub current_state: State,
    pub horizon: usize,
    /// Raw history buffer `[slot][cvar][node][mode]`.
    pub history: Vec<f64>,
    pub noise: Option<NoiseState>,
}

/// Scratch buffers sized at configure time.
#[derive(Debug, Clone)]
struct Buffers {
    /// Zero-delay coupling variables of the regions.
    x_i: State,
    x_j: DelayedState,
    region_coupling: State,
    node_coupling: State,
    /// Coupling variables of every node, before region averaging.
    node_cvars: State,
    region_cvars: State,
    lc: State,
    stimulus: Option<State>,
}

impl Buffers {
    fn new(ncvar: usize, nregion: usize, nnode: usize, nvar: usize, nmode: usize) -> Self {
        Self {
            x_i: State::zeros(ncvar, nregion, nmode),
            x_j: DelayedState::zeros(ncvar, nregion, nmode),
            region_coupling: State::zeros(ncvar, nregion, nmode),
            node_coupling: State::zeros(ncvar, nnode, nmode),
            node_cvars: State::zeros(ncvar, nnode, nmode),
            region_cvars: State::zeros(ncvar, nregion, nmode),
            lc: State::zeros(nvar, nnode, nmode),
            stimulus: None,
        }
    }

    fn bytes(&self) -> usize {
        let n = self.x_i.data().len()
            + self.x_j.block_len() * self.x_j.nnode()
            + self.region_coupling.data().len()
            + self.node_coupling.data().len()
            + self.node_cvars.data().len()
            + self.region_cvars.data().len()
            + self.lc.data().len()
            + self.stimulus.as_ref().map_or(0, |s| s.data().len());
        n * core::mem::size_of::<f64>()
    }
}

pub struct Simulator {
    model: Box<dyn Model>,
    connectivity: Connectivity,
    coupling: Box<dyn Coupling>,
    integrator: Box<dyn Integrator>,
    monitors: Vec<Box<dyn Monitor>>,
    stimulus: Option<Stimulus>,
    surface: Option<Surface>,
    initial_conditions: Option<Vec<State>>,
    /// Length of one `iter()` pass in ms.
    simulation_length: f64,
    seed: u64,
    tier: ExecutionTier,

    configured: bool,
    current_step: u64,
    current_state: State,
    history: History,
    buffers: Buffers,
}

impl core::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Simulator")
            .field("model", &self.model.name())
            .field("coupling", &self.coupling.name())
            .field("integrator", &self.integrator.name())
            .field(
                "monitors",
                &self.monitors.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("configured", &self.configured)
            .field("current_step", &self.current_step)
            .finish()
    }
}

impl Simulator {
    pub fn new<M, C, I>(model: M, connectivity: Connectivity, coupling: C, integrator: I) -> Self
    where
        M: Model + 'static,
        C: Coupling + 'static,
        I: Integrator + 'static,
    {
        Self::from_boxed(
            Box::new(model),
            connectivity,
            Box::new(coupling),
            Box::new(integrator),
        )
    }

    pub fn from_boxed(
        model: Box<dyn Model>,
        connectivity: Connectivity,
        coupling: Box<dyn Coupling>,
        integrator: Box<dyn Integrator>,
    ) -> Self {
        Self {
            model,
            connectivity,
            coupling,
            integrator,
            monitors: Vec::new(),
            stimulus: None,
            surface: None,
            initial_conditions: None,
            simulation_length: 1000.0,
            seed: 42,
            tier: ExecutionTier::Scalar,
            configured: false,
            current_step: 0,
            current_state: State::zeros(0, 0, 0),
            history: History::new(1, 0, 0, 0),
            buffers: Buffers::new(0, 0, 0, 0, 0),
        }
    }

    pub fn with_monitor<M: Monitor + 'static>(self, monitor: M) -> Self {
        self.with_boxed_monitor(Box::new(monitor))
    }

    pub fn with_boxed_monitor(mut self, monitor: Box<dyn Monitor>) -> Self {
        self.monitors.push(monitor);
        self.configured = false;
        self
    }

    pub fn with_stimulus(mut self, stimulus: Stimulus) -> Self {
        self.stimulus = Some(stimulus);
        self.configured = false;
        self
    }

    pub fn with_surface(mut self, surface: Surface) -> Self {
        self.surface = Some(surface);
        self.configured = false;
        self
    }

    /// Time-ordered states (oldest first); the last one is the state at step 0.
    pub fn with_initial_conditions(mut self, states: Vec<State>) -> Self {
        self.initial_conditions = Some(states);
        self.configured = false;
        self
    }

    pub fn with_simulation_length(mut self, ms: f64) -> Self {
        self.simulation_length = ms;
        self
    }

    /// Seed for random initial conditions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.configured = false;
        self
    }

    pub fn with_execution_tier(mut self, tier: ExecutionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.tier = tier;
    }

    pub fn execution_tier(&self) -> ExecutionTier {
        self.tier
    }

    /// Returns the effective execution tier that will actually be used.
    ///
    /// This accounts for the compile-time `parallel` feature gate.
    pub fn effective_execution_tier(&self) -> ExecutionTier {
        match self.tier {
            ExecutionTier::Scalar => ExecutionTier::Scalar,
            ExecutionTier::Parallel => {
                #[cfg(feature = "parallel")]
                {
                    ExecutionTier::Parallel
                }
                #[cfg(not(feature = "parallel"))]
                {
                    ExecutionTier::Scalar
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Validate every component against the others, size the history and
    /// prime it. Calling it again on a configured simulator is a no-op.
    pub fn configure(&mut self) -> Result<()> {
        if self.configured {
            return Ok(());
        }
        let dt = self.integrator.dt();
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::config(
                Component::Integrator,
                format!("dt must be finite and > 0, got {dt}"),
            ));
        }

        self.connectivity.configure()?;
        self.connectivity.set_idelays(dt)?;
        let nregion = self.connectivity.number_of_regions();

        let nnode = match self.surface.as_mut() {
            Some(surface) => {
                surface.configure(nregion)?;
                surface.number_of_vertices()
            }
            None => nregion,
        };

        self.model.validate(nnode)?;
        self.model.update_derived_parameters();
        let nvar = self.model.nvar();
        let nmode = self.model.number_of_modes();
        let ncvar = self.model.cvar().len();
        if ncvar == 0 {
            return Err(SimError::config(
                Component::Model,
                format!("{} exposes no coupling variables", self.model.name()),
            ));
        }
        self.coupling.configure(ncvar, nregion)?;
        self.integrator.configure(self.model.as_ref(), nnode)?;

        let mut buffers = Buffers::new(ncvar, nregion, nnode, nvar, nmode);
        if let Some(stimulus) = self.stimulus.as_mut() {
            stimulus.configure(nnode, nvar, self.model.stimulated_variables())?;
            buffers.stimulus = Some(State::zeros(nvar, nnode, nmode));
        }
        self.buffers = buffers;

        let horizon = self.connectivity.horizon();
        self.history = History::try_new(horizon, ncvar, nregion, nmode)?;
        let states = self.initial_history(horizon, (nvar, nnode, nmode))?;
        let mut region_states = Vec::with_capacity(states.len());
        for state in &states {
            region_states.push(self.region_cvars_of(state));
        }
        self.history.initialize(&region_states, 0)?;
        self.current_state = states
            .into_iter()
            .last()
            .unwrap_or_else(|| State::zeros(nvar, nnode, nmode));
        self.current_step = 0;

        let region_mapping = self.surface.as_ref().map(|s| s.region_mapping.as_slice());
        let ctx = MonitorContext {
            dt,
            nvar,
            nnode,
            nmode,
            cvar: self.model.cvar(),
            variables_of_interest: self.model.variables_of_interest(),
            region_mapping,
            nregion,
            initial_state: &self.current_state,
        };
        for monitor in self.monitors.iter_mut() {
            monitor.config_for_sim(&ctx)?;
        }

        self.configured = true;
        info!(
            model = self.model.name(),
            coupling = self.coupling.name(),
            integrator = self.integrator.name(),
            nnode,
            horizon,
            monitors = self.monitors.len(),
            "simulator configured"
        );
        Ok(())
    }

    /// Drop the current run and configure again (e.g. after changing `dt` or speed).
    pub fn reconfigure(&mut self) -> Result<()> {
        self.configured = false;
        self.configure()
    }

    fn initial_history(&self, horizon: usize, shape: (usize, usize, usize)) -> Result<Vec<State>> {
        let Some(given) = self.initial_conditions.as_ref() else {
            let mut rng = Prng::new(self.seed);
            return Ok((0..horizon)
                .map(|_| self.model.initial(&mut rng, shape.1))
                .collect());
        };
        if given.is_empty() {
            return Err(SimError::config(
                Component::Simulator,
                "initial conditions are empty",
            ));
        }
        if let Some((i, bad)) = given.iter().enumerate().find(|(_, s)| s.shape() != shape) {
            return Err(SimError::config(
                Component::Simulator,
                format!(
                    "initial condition {i} has shape {:?}, expected {:?}",
                    bad.shape(),
                    shape
                ),
            ));
        }
        if given.len() == horizon {
            return Ok(given.clone());
        }
        if given.len() < horizon {
            warn!(
                given = given.len(),
                horizon, "initial conditions shorter than the history; padding with the oldest state"
            );
            let mut padded = vec![given[0].clone(); horizon - given.len()];
            padded.extend(given.iter().cloned());
            Ok(padded)
        } else {
            warn!(
                given = given.len(),
                horizon, "initial conditions longer than the history; keeping the newest states"
            );
            Ok(given[given.len() - horizon..].to_vec())
        }
    }

    /// Coupling variables of a full state, averaged per region on a surface.
    fn region_cvars_of(&self, state: &State) -> State {
        let cvars = state.select_vars(self.model.cvar());
        match &self.surface {
            Some(surface) => {
                let mut out = State::zeros(cvars.nvar(), self.connectivity.number_of_regions(), cvars.nmode());
                surface.region_average(&cvars, &mut out);
                out
            }
            None => cvars,
        }
    }

    // ---------------------------------------------------------------------
    // Stepping
    // ---------------------------------------------------------------------

    /// Advance one integration step.
    ///
    /// Returns the monitor outputs when at least one monitor sampled on this
    /// step. A non-finite state aborts with `SimError::Unstable`; the step
    /// counter is not advanced in that case.
    pub fn step(&mut self) -> Result<Option<StepOutput>> {
        if !self.configured {
            return Err(SimError::NotConfigured);
        }
        let step = self.current_step + 1;
        let dt = self.integrator.dt();
        let tier = self.effective_execution_tier();
        let b = &mut self.buffers;

        // Delayed gather and long-range coupling on regions.
        match tier {
            #[cfg(feature = "parallel")]
            ExecutionTier::Parallel => {
                self.history
                    .query_parallel(step, self.connectivity.idelays(), &mut b.x_j);
                self.history.current(step, &mut b.x_i);
                crate::coupling::couple_parallel(
                    self.coupling.as_ref(),
                    self.connectivity.weights(),
                    &b.x_i,
                    &b.x_j,
                    &mut b.region_coupling,
                );
            }
            _ => {
                self.history
                    .query(step, self.connectivity.idelays(), &mut b.x_j);
                self.history.current(step, &mut b.x_i);
                self.coupling.couple(
                    self.connectivity.weights(),
                    &b.x_i,
                    &b.x_j,
                    &mut b.region_coupling,
                );
            }
        }
        match &self.surface {
            Some(surface) => surface.broadcast(&b.region_coupling, &mut b.node_coupling),
            None => b.node_coupling.copy_from(&b.region_coupling),
        }

        // Stimulus at the time of the state being advanced.
        let stimulus = match (&self.stimulus, b.stimulus.as_mut()) {
            (Some(stim), Some(buf)) => {
                stim.evaluate((step - 1) as f64 * dt, buf);
                Some(&*buf)
            }
            _ => None,
        };

        let local = self
            .surface
            .as_ref()
            .and_then(|s| s.local_connectivity.as_ref());
        let mut dfun = Dfun::new(self.model.as_ref(), &b.node_coupling, local, &mut b.lc);
        self.integrator
            .scheme(&mut self.current_state, &mut dfun, stimulus);

        if let Some((variable, node, mode)) = self.current_state.first_non_finite() {
            return Err(SimError::Unstable {
                step,
                variable,
                node,
                mode,
            });
        }

        // Write back the new coupling variables.
        self.current_state
            .select_vars_into(self.model.cvar(), &mut b.node_cvars);
        match &self.surface {
            Some(surface) => {
                surface.region_average(&b.node_cvars, &mut b.region_cvars);
                self.history.update(step, &b.region_cvars);
            }
            None => self.history.update(step, &b.node_cvars),
        }
        self.current_step = step;

        if self.monitors.is_empty() {
            return Ok(None);
        }
        let mut any = false;
        let mut samples = Vec::with_capacity(self.monitors.len());
        for monitor in self.monitors.iter_mut() {
            let observation = match monitor.observed() {
                Observed::State => &self.current_state,
                Observed::Coupling => &b.node_coupling,
            };
            let sample = monitor.record(step, observation);
            any |= sample.is_some();
            samples.push(sample);
        }
        Ok(any.then_some(StepOutput { step, samples }))
    }

    /// Iterator over the monitor outputs of the next `steps` steps.
    ///
    /// Steps without output are skipped. After an error the iterator ends.
    pub fn run(&mut self, steps: u64) -> Run<'_> {
        Run {
            sim: self,
            remaining: steps,
            failed: false,
        }
    }

    /// One `simulation_length` worth of steps from wherever the run stands.
    pub fn iter(&mut self) -> Run<'_> {
        let steps = (self.simulation_length / self.integrator.dt()).round().max(0.0) as u64;
        self.run(steps)
    }

    /// Run `steps` steps and gather the output of each monitor.
    pub fn run_collect(&mut self, steps: u64) -> Result<Vec<TimeSeries>> {
        self.configure()?;
        let mut series: Vec<TimeSeries> = self
            .monitors
            .iter()
            .map(|m| TimeSeries {
                monitor: m.name().to_string(),
                ..TimeSeries::default()
            })
            .collect();
        for output in self.run(steps) {
            let output = output?;
            for (ts, sample) in series.iter_mut().zip(output.samples) {
                if let Some(sample) = sample {
                    ts.times.push(sample.time);
                    ts.data.push(sample.data);
                }
            }
        }
        debug!(steps, "run collected");
        Ok(series)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Time of the current state in ms.
    pub fn current_time(&self) -> f64 {
        self.current_step as f64 * self.integrator.dt()
    }

    pub fn current_state(&self) -> &State {
        &self.current_state
    }

    /// Afferent coupling applied during the last step, i.e. to the state at
    /// `current_step - 1`, per node.
    pub fn node_coupling(&self) -> &State {
        &self.buffers.node_coupling
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn horizon(&self) -> usize {
        self.history.horizon()
    }

    pub fn dt(&self) -> f64 {
        self.integrator.dt()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Changing the connectome requires `reconfigure()`.
    pub fn connectivity_mut(&mut self) -> &mut Connectivity {
        self.configured = false;
        &mut self.connectivity
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn integrator(&self) -> &dyn Integrator {
        self.integrator.as_ref()
    }

    pub fn monitor_names(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|m| m.name()).collect()
    }

    pub fn simulation_length(&self) -> f64 {
        self.simulation_length
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let connection_count = self
            .connectivity
            .weights()
            .iter()
            .filter(|w| **w != 0.0)
            .count();
        let memory_bytes = (self.current_state.data().len() + self.history.as_slice().len())
            * core::mem::size_of::<f64>()
            + self.buffers.bytes();
        Diagnostics {
            node_count: self.current_state.nnode(),
            region_count: self.connectivity.number_of_regions(),
            state_variables: self.current_state.nvar(),
            coupling_variables: self.history.ncvar(),
            modes: self.current_state.nmode(),
            horizon: self.history.horizon(),
            connection_count,
            current_step: self.current_step,
            current_time: self.current_time(),
            memory_bytes,
            execution_tier: self.effective_execution_tier(),
        }
    }

    // ---------------------------------------------------------------------
    // Checkpoints
    // ---------------------------------------------------------------------

    pub fn checkpoint(&self) -> Result<Checkpoint> {
        if !self.configured {
            return Err(SimError::NotConfigured);
        }
        Ok(Checkpoint {
            current_step: self.current_step,
            current_state: self.current_state.clone(),
            horizon: self.history.horizon(),
            history: self.history.as_slice().to_vec(),
            noise: self.integrator.noise().map(|n| n.state()),
        })
    }

    /// Continue from a checkpoint taken on an identically configured simulator.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.configure()?;
        if checkpoint.horizon != self.history.horizon() {
            return Err(SimError::Checkpoint(format!(
                "checkpoint horizon {} does not match configured horizon {}",
                checkpoint.horizon,
                self.history.horizon()
            )));
        }
        if checkpoint.current_state.shape() != self.current_state.shape() {
            return Err(SimError::Checkpoint(format!(
                "checkpoint state shape {:?} does not match {:?}",
                checkpoint.current_state.shape(),
                self.current_state.shape()
            )));
        }
        self.history.load_raw(&checkpoint.history)?;
        match (self.integrator.noise_mut(), &checkpoint.noise) {
            (Some(noise), Some(state)) => noise.restore(state)?,
            (None, None) => {}
            (Some(_), None) => {
                return Err(SimError::Checkpoint(
                    "checkpoint has no noise state for a stochastic integrator".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(SimError::Checkpoint(
                    "checkpoint carries noise state but the integrator is deterministic".into(),
                ))
            }
        }
        self.current_state.copy_from(&checkpoint.current_state);
        self.current_step = checkpoint.current_step;
        info!(step = self.current_step, "simulator restored from checkpoint");
        Ok(())
    }
}

/// Pull-based driver returned by [`Simulator::run`].
pub struct Run<'a> {
    sim: &'a mut Simulator,
    remaining: u64,
    failed: bool,
}

impl Iterator for Run<'_> {
    type Item = Result<StepOutput>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed && self.remaining > 0 {
            self.remaining -= 1;
            match self.sim.step() {
                Ok(Some(output)) => return Some(Ok(output)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

// -------------------------------------------------------------------------
// Checkpoint image
// -------------------------------------------------------------------------

#[cfg(feature = "std")]
impl Checkpoint {
    /// Serialize a versioned, chunked checkpoint image (LZ4 payloads).
    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(storage::MAGIC)?;
        storage::write_u32_le(w, storage::VERSION_CURRENT)?;

        let mut payload = Vec::with_capacity(8);
        storage::write_u64_le(&mut payload, self.current_step)?;
        storage::write_chunk_lz4(w, *b"STEP", &payload)?;

        let (nvar, nnode, nmode) = self.current_state.shape();
        let mut payload = Vec::with_capacity(16);
        for v in [nvar, nnode, nmode, self.horizon] {
            storage::write_u32_le(&mut payload, to_u32(v)?)?;
        }
        storage::write_chunk_lz4(w, *b"SHAP", &payload)?;

        let mut payload = Vec::with_capacity(8 + self.current_state.data().len() * 8);
        storage::write_f64_slice(&mut payload, self.current_state.data())?;
        storage::write_chunk_lz4(w, *b"STAT", &payload)?;

        let mut payload = Vec::with_capacity(8 + self.history.len() * 8);
        storage::write_f64_slice(&mut payload, &self.history)?;
        storage::write_chunk_lz4(w, *b"HIST", &payload)?;

        if let Some(noise) = &self.noise {
            let mut payload = Vec::with_capacity(16 + noise.eta.len() * 8);
            storage::write_u64_le(&mut payload, noise.rng)?;
            storage::write_f64_slice(&mut payload, &noise.eta)?;
            storage::write_chunk_lz4(w, *b"NOIS", &payload)?;
        }
        Ok(())
    }

    /// Load a checkpoint image. Unknown chunks are skipped.
    pub fn load_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let magic = storage::read_exact::<8, _>(r)?;
        if &magic != storage::MAGIC {
            return Err(invalid("bad checkpoint magic"));
        }
        let version = storage::read_u32_le(r)?;
        if version != storage::VERSION_CURRENT {
            return Err(invalid("unsupported checkpoint version"));
        }

        let mut step: Option<u64> = None;
        let mut shape: Option<[usize; 4]> = None;
        let mut state: Option<Vec<f64>> = None;
        let mut history: Option<Vec<f64>> = None;
        let mut noise: Option<NoiseState> = None;

        loop {
            let (tag, len) = match storage::read_chunk_header(r) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            let payload = storage::read_chunk_payload(r, len)?;
            let mut cursor = io::Cursor::new(payload);
            match &tag {
                b"STEP" => step = Some(storage::read_u64_le(&mut cursor)?),
                b"SHAP" => {
                    let mut dims = [0usize; 4];
                    for d in dims.iter_mut() {
                        *d = storage::read_u32_le(&mut cursor)? as usize;
                    }
                    shape = Some(dims);
                }
                b"STAT" => state = Some(storage::read_f64_vec(&mut cursor)?),
                b"HIST" => history = Some(storage::read_f64_vec(&mut cursor)?),
                b"NOIS" => {
                    let rng = storage::read_u64_le(&mut cursor)?;
                    let eta = storage::read_f64_vec(&mut cursor)?;
                    noise = Some(NoiseState { rng, eta });
                }
                _ => {
                    // Unknown chunk: skipped.
                }
            }
        }

        let step = step.ok_or_else(|| invalid("missing STEP"))?;
        let [nvar, nnode, nmode, horizon] = shape.ok_or_else(|| invalid("missing SHAP"))?;
        let state = state.ok_or_else(|| invalid("missing STAT"))?;
        let history = history.ok_or_else(|| invalid("missing HIST"))?;
        let current_state =
            State::from_vec(nvar, nnode, nmode, state).map_err(|_| invalid("STAT size mismatch"))?;
        Ok(Checkpoint {
            current_step: step,
            current_state,
            horizon,
            history,
            noise,
        })
    }

    pub fn save_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.save_to(&mut buf)?;
        Ok(buf)
    }

    pub fn load_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = io::Cursor::new(bytes);
        Self::load_from(&mut cursor)
    }

    /// Exact serialized size in bytes.
    pub fn image_size_bytes(&self) -> io::Result<usize> {
        let mut cw = storage::CountingWriter::new();
        self.save_to(&mut cw)?;
        Ok(cw.written())
    }
}

#[cfg(feature = "serde")]
impl Checkpoint {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(feature = "std")]
fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(feature = "std")]
fn to_u32(v: usize) -> io::Result<u32> {
    u32::try_from(v).map_err(|_| invalid("dimension too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::{Linear as LinearCoupling, Scaling};
    use crate::integrators::{EulerDeterministic, HeunStochastic};
    use crate::models::{Generic2dOscillator, Linear};
    use crate::monitors::{Raw, SubSample, TemporalAverage};
    use crate::noise::Noise;

    fn two_nodes(tract: f64) -> Connectivity {
        Connectivity::from_rows(
            &[vec![0.0, 1.0], vec![1.0, 0.0]],
            &[vec![0.0, tract], vec![tract, 0.0]],
        )
        .unwrap()
        .with_speed(crate::connectivity::Speed::Uniform(1.0))
    }

    #[test]
    fn stepping_requires_configure() {
        let mut sim = Simulator::new(
            Linear::default(),
            two_nodes(2.0),
            LinearCoupling::default(),
            EulerDeterministic::new(1.0),
        );
        assert!(matches!(sim.step(), Err(SimError::NotConfigured)));
        sim.configure().unwrap();
        assert!(sim.step().is_ok());
        assert_eq!(sim.current_step(), 1);
    }

    #[test]
    fn configure_is_idempotent_and_sizes_history() {
        let mut sim = Simulator::new(
            Generic2dOscillator::default(),
            two_nodes(4.0),
            LinearCoupling::default(),
            EulerDeterministic::new(0.5),
        );
        sim.configure().unwrap();
        assert_eq!(sim.horizon(), 9);
        sim.step().unwrap();
        sim.configure().unwrap();
        assert_eq!(sim.current_step(), 1);
        sim.reconfigure().unwrap();
        assert_eq!(sim.current_step(), 0);
    }

    #[test]
    fn random_initial_history_is_seeded() {
        let build = |seed| {
            let mut sim = Simulator::new(
                Generic2dOscillator::default(),
                two_nodes(3.0),
                LinearCoupling::default(),
                EulerDeterministic::new(1.0),
            )
            .with_seed(seed);
            sim.configure().unwrap();
            sim.current_state().clone()
        };
        assert_eq!(build(1), build(1));
        assert_ne!(build(1), build(2));
    }

    #[test]
    fn short_initial_conditions_are_padded() {
        let x0 = State::from_rows(&[vec![0.5, -0.5]]).unwrap();
        let mut sim = Simulator::new(
            Linear::default(),
            two_nodes(3.0),
            LinearCoupling::default(),
            EulerDeterministic::new(1.0),
        )
        .with_initial_conditions(vec![x0.clone()]);
        sim.configure().unwrap();
        assert_eq!(sim.current_state(), &x0);
        for t in -3..=0 {
            assert_eq!(sim.history().state_at(t), x0);
        }
    }

    #[test]
    fn bad_initial_shape_is_a_configuration_error() {
        let mut sim = Simulator::new(
            Linear::default(),
            two_nodes(3.0),
            LinearCoupling::default(),
            EulerDeterministic::new(1.0),
        )
        .with_initial_conditions(vec![State::zeros(1, 3, 1)]);
        let err = sim.configure().unwrap_err();
        assert_eq!(err.component(), Some(Component::Simulator));
    }

    #[test]
    fn monitor_cadence_is_reported_per_step() {
        let mut sim = Simulator::new(
            Linear::default(),
            two_nodes(1.0),
            Scaling { a: 0.0 },
            EulerDeterministic::new(0.5),
        )
        .with_monitor(Raw::new())
        .with_monitor(SubSample::new(2.0));
        sim.configure().unwrap();
        let outputs: Vec<StepOutput> = sim.run(8).map(|o| o.unwrap()).collect();
        assert_eq!(outputs.len(), 8);
        let sub: Vec<u64> = outputs
            .iter()
            .filter(|o| o.samples[1].is_some())
            .map(|o| o.step)
            .collect();
        assert_eq!(sub, vec![4, 8]);
    }

    #[test]
    fn unstable_state_aborts_the_run() {
        let mut sim = Simulator::new(
            Linear::with_gamma(1e6),
            two_nodes(1.0),
            Scaling { a: 0.0 },
            EulerDeterministic::new(1.0),
        )
        .with_initial_conditions(vec![State::filled(1, 2, 1, 1.0)])
        .with_monitor(Raw::new());
        sim.configure().unwrap();
        let results: Vec<_> = sim.run(1000).collect();
        let last = results.last().unwrap();
        assert!(matches!(last, Err(SimError::Unstable { .. })));
        assert!(results[..results.len() - 1].iter().all(|r| r.is_ok()));
        assert!(results.len() < 1000);
    }

    #[test]
    fn checkpoint_image_round_trip() {
        let mut sim = Simulator::new(
            Generic2dOscillator::default(),
            two_nodes(3.0),
            LinearCoupling::default(),
            HeunStochastic::new(0.5, Noise::additive(1e-3).with_seed(5)),
        )
        .with_monitor(TemporalAverage::new(2.0));
        sim.configure().unwrap();
        for _ in 0..7 {
            sim.step().unwrap();
        }
        let ckpt = sim.checkpoint().unwrap();
        let bytes = ckpt.save_bytes().unwrap();
        assert_eq!(bytes.len(), ckpt.image_size_bytes().unwrap());
        let back = Checkpoint::load_bytes(&bytes).unwrap();
        assert_eq!(back, ckpt);
        assert!(Checkpoint::load_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn diagnostics_report_sizes() {
        let mut sim = Simulator::new(
            Generic2dOscillator::default(),
            two_nodes(3.0),
            LinearCoupling::default(),
            EulerDeterministic::new(1.0),
        );
        sim.configure().unwrap();
        let d = sim.diagnostics();
        assert_eq!(d.node_count, 2);
        assert_eq!(d.state_variables, 2);
        assert_eq!(d.coupling_variables, 1);
        assert_eq!(d.horizon, 4);
        assert_eq!(d.connection_count, 2);
        assert!(d.memory_bytes > 0);
    }

    #[cfg(not(feature = "parallel"))]
    #[test]
    fn parallel_tier_falls_back_without_feature() {
        let sim = Simulator::new(
            Linear::default(),
            two_nodes(1.0),
            LinearCoupling::default(),
            EulerDeterministic::new(1.0),
        )
        .with_execution_tier(ExecutionTier::Parallel);
        assert_eq!(sim.effective_execution_tier(), ExecutionTier::Scalar);
    }
}
