//! Delay-coupled neural-mass network simulation.
//!
//! A [`simulator::Simulator`] integrates a local [`models::Model`] at every
//! node of a [`connectivity::Connectivity`], coupling nodes through axonal
//! delays held in a ring-buffer [`history::History`], and reports the
//! trajectory through [`monitors`].
//!
//! ```no_run
//! use tvb::prelude::*;
//!
//! let conn = Connectivity::from_rows(
//!     &[vec![0.0, 1.0], vec![1.0, 0.0]],
//!     &[vec![0.0, 12.0], vec![12.0, 0.0]],
//! )?;
//! let mut sim = Simulator::new(
//!     Generic2dOscillator::default(),
//!     conn,
//!     coupling::Linear { a: 0.0152, b: 0.0 },
//!     HeunDeterministic::new(0.1),
//! )
//! .with_monitor(TemporalAverage::new(1.0));
//! sim.configure()?;
//! let series = sim.run_collect(10_000)?;
//! # Ok::<(), tvb::error::SimError>(())
//! ```

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/state.rs"]
pub mod state;

#[path = "core/connectivity.rs"]
pub mod connectivity;

#[path = "core/history.rs"]
pub mod history;

#[path = "core/coupling.rs"]
pub mod coupling;

#[path = "core/noise.rs"]
pub mod noise;

#[path = "core/integrators.rs"]
pub mod integrators;

#[path = "core/equations.rs"]
pub mod equations;

#[path = "core/stimulus.rs"]
pub mod stimulus;

#[path = "core/surface.rs"]
pub mod surface;

#[cfg(feature = "std")]
#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/simulator.rs"]
pub mod simulator;

pub mod models;
pub mod monitors;
pub mod telemetry;

#[cfg(feature = "serde")]
pub mod config;

pub mod prelude {
    pub use crate::connectivity::{Connectivity, Speed, WeightScaling};
    pub use crate::coupling::{self, Coupling};
    pub use crate::equations::{Gaussian, HrfKernel, TemporalEquation};
    pub use crate::error::{Component, Result, SimError};
    pub use crate::integrators::{
        EulerDeterministic, EulerStochastic, HeunDeterministic, HeunStochastic, Identity,
        Integrator, IntegratorSpec, RungeKutta4thOrderDeterministic,
        RungeKutta4thOrderStochastic, Scheme,
    };
    pub use crate::models::{
        Generic2dOscillator, JansenRit, Kuramoto, Linear, Model, WilsonCowan,
    };
    pub use crate::monitors::{
        BalloonWindkessel, Bold, BoldReadout, EegReference, Monitor, Observed, Projection,
        ProjectionKind, Raw, Sample, SpatialAverage, SpatialMask, SubSample, TemporalAverage,
    };
    pub use crate::noise::{Noise, NoiseConfig, NoiseKind};
    pub use crate::simulator::{
        Checkpoint, Diagnostics, ExecutionTier, Simulator, StepOutput, TimeSeries,
    };
    pub use crate::state::{Parameter, State};
    pub use crate::stimulus::Stimulus;
    pub use crate::surface::{LocalConnectivity, Surface};
}
