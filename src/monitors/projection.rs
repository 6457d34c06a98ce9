//! Sensor-space monitors: temporal average followed by a lead-field product.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Component, Result, SimError};
use crate::state::State;

use super::{Monitor, MonitorContext, Observed, Sample, TemporalAverage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProjectionKind {
    Eeg,
    Meg,
    Seeg,
}

/// Re-referencing applied to EEG sensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EegReference {
    /// Subtract the mean over sensors.
    Average,
    /// Subtract the signal of one sensor.
    Sensor(usize),
}

/// `gain @ mean(x)` with `gain` of shape `(nsensors, nnode)`, row-major.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Projection {
    pub kind: ProjectionKind,
    pub period: f64,
    pub nsensors: usize,
    pub gain: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub reference: Option<EegReference>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub variables_of_interest: Option<Vec<usize>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    average: Option<TemporalAverage>,
}

impl Projection {
    pub fn new(kind: ProjectionKind, period: f64, nsensors: usize, gain: Vec<f64>) -> Self {
        Self {
            kind,
            period,
            nsensors,
            gain,
            reference: None,
            variables_of_interest: None,
            average: None,
        }
    }

    pub fn eeg(period: f64, nsensors: usize, gain: Vec<f64>) -> Self {
        Self::new(ProjectionKind::Eeg, period, nsensors, gain)
    }

    pub fn meg(period: f64, nsensors: usize, gain: Vec<f64>) -> Self {
        Self::new(ProjectionKind::Meg, period, nsensors, gain)
    }

    pub fn seeg(period: f64, nsensors: usize, gain: Vec<f64>) -> Self {
        Self::new(ProjectionKind::Seeg, period, nsensors, gain)
    }

    pub fn with_reference(mut self, reference: EegReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_variables(mut self, voi: Vec<usize>) -> Self {
        self.variables_of_interest = Some(voi);
        self
    }

    fn project(&self, mean: &State) -> State {
        let (nvoi, n, m) = mean.shape();
        let mut out = State::zeros(nvoi, self.nsensors, m);
        for v in 0..nvoi {
            for s in 0..self.nsensors {
                let row = &self.gain[s * n..(s + 1) * n];
                for mode in 0..m {
                    let acc: f64 = row
                        .iter()
                        .enumerate()
                        .map(|(node, g)| g * mean.get(v, node, mode))
                        .sum();
                    out.set(v, s, mode, acc);
                }
            }
        }
        if let Some(reference) = self.reference {
            apply_reference(reference, &mut out);
        }
        out
    }
}

fn apply_reference(reference: EegReference, out: &mut State) {
    let (nvoi, ns, m) = out.shape();
    for v in 0..nvoi {
        for mode in 0..m {
            let offset = match reference {
                EegReference::Average => {
                    (0..ns).map(|s| out.get(v, s, mode)).sum::<f64>() / ns.max(1) as f64
                }
                EegReference::Sensor(r) => out.get(v, r, mode),
            };
            for s in 0..ns {
                let value = out.get(v, s, mode) - offset;
                out.set(v, s, mode, value);
            }
        }
    }
}

impl Monitor for Projection {
    fn name(&self) -> &'static str {
        match self.kind {
            ProjectionKind::Eeg => "EEG",
            ProjectionKind::Meg => "MEG",
            ProjectionKind::Seeg => "SEEG",
        }
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn istep(&self) -> usize {
        self.average.as_ref().map_or(0, |a| a.istep())
    }

    fn config_for_sim(&mut self, ctx: &MonitorContext<'_>) -> Result<()> {
        let name = self.name();
        if self.nsensors == 0 || self.gain.len() % self.nsensors != 0 {
            return Err(SimError::config(
                Component::Monitor,
                format!(
                    "{name}: gain has {} entries, not a multiple of {} sensors",
                    self.gain.len(),
                    self.nsensors
                ),
            ));
        }
        let columns = self.gain.len() / self.nsensors;
        if columns != ctx.nnode {
            return Err(SimError::config(
                Component::Monitor,
                format!(
                    "{name}: gain matrix has {columns} columns but the simulation has {} nodes",
                    ctx.nnode
                ),
            ));
        }
        if let Some(EegReference::Sensor(r)) = self.reference {
            if r >= self.nsensors {
                return Err(SimError::config(
                    Component::Monitor,
                    format!("{name}: reference sensor {r} out of range for {} sensors", self.nsensors),
                ));
            }
        }
        let mut average = TemporalAverage::new(self.period);
        average.variables_of_interest = self.variables_of_interest.clone();
        average.observe = Observed::State;
        average.config_for_sim(ctx)?;
        self.average = Some(average);
        Ok(())
    }

    fn record(&mut self, step: u64, observation: &State) -> Option<Sample> {
        let (time, mean) = self.average.as_mut()?.accumulate(step, observation)?;
        Some(Sample {
            time,
            data: self.project(&mean),
        })
    }
}
