//! Circular buffer of past coupling-variable states.
//!
//! Slot `t mod horizon` holds the coupling variables of the state computed at
//! integration step `t`. While computing step `s`, the state of source `j` seen
//! by target `k` is read from slot `(s - 1 - idelay[k, j]) mod horizon`, so a
//! zero delay sees the state being advanced and the longest delay sees the
//! oldest slot still held. The slot for `s` itself is only written after the
//! new state exists.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Component, Result, SimError};
use crate::state::{DelayedState, State};

/// Upper bound on the values held across all slots (2 GiB of `f64`).
pub const MAX_HISTORY_VALUES: usize = 1 << 28;

#[derive(Debug, Clone)]
pub struct History {
    horizon: usize,
    ncvar: usize,
    nnode: usize,
    nmode: usize,
    // [slot][cvar][node][mode]
    buffer: Vec<f64>,
}

impl History {
    pub fn new(horizon: usize, ncvar: usize, nnode: usize, nmode: usize) -> Self {
        let horizon = horizon.max(1);
        Self {
            horizon,
            ncvar,
            nnode,
            nmode,
            buffer: vec![0.0; horizon * ncvar * nnode * nmode],
        }
    }

    /// Like `new`, but refuses buffers that overflow or exceed
    /// [`MAX_HISTORY_VALUES`].
    pub fn try_new(horizon: usize, ncvar: usize, nnode: usize, nmode: usize) -> Result<Self> {
        let values = horizon
            .max(1)
            .checked_mul(ncvar)
            .and_then(|n| n.checked_mul(nnode))
            .and_then(|n| n.checked_mul(nmode));
        match values {
            Some(n) if n <= MAX_HISTORY_VALUES => Ok(Self::new(horizon, ncvar, nnode, nmode)),
            _ => Err(SimError::config(
                Component::Connectivity,
                format!(
                    "history of {horizon} steps x {ncvar} cvars x {nnode} nodes x {nmode} modes \
                     exceeds {MAX_HISTORY_VALUES} values"
                ),
            )),
        }
    }

    #[inline]
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    #[inline]
    pub fn ncvar(&self) -> usize {
        self.ncvar
    }

    #[inline]
    pub fn nnode(&self) -> usize {
        self.nnode
    }

    #[inline]
    pub fn nmode(&self) -> usize {
        self.nmode
    }

    #[inline]
    fn slot_len(&self) -> usize {
        self.ncvar * self.nnode * self.nmode
    }

    /// Slot holding the state of step `time` (may be negative for the
    /// pre-start part of the initial history).
    #[inline]
    pub fn slot_of(&self, time: i64) -> usize {
        time.rem_euclid(self.horizon as i64) as usize
    }

    /// Slot read for a `delay`-step edge while computing `step`.
    #[inline]
    pub fn read_slot(&self, step: u64, delay: usize) -> usize {
        self.slot_of(step as i64 - 1 - delay as i64)
    }

    fn slot(&self, slot: usize) -> &[f64] {
        let len = self.slot_len();
        &self.buffer[slot * len..(slot + 1) * len]
    }

    fn slot_mut(&mut self, slot: usize) -> &mut [f64] {
        let len = self.slot_len();
        &mut self.buffer[slot * len..(slot + 1) * len]
    }

    /// Fill the buffer from time-ordered coupling states (oldest first).
    ///
    /// The last entry is the state at `current_step`. Exactly `horizon`
    /// entries are expected; each must be `(ncvar, nnode, nmode)`.
    pub fn initialize(&mut self, states: &[State], current_step: u64) -> Result<()> {
        if states.len() != self.horizon {
            return Err(SimError::config(
                Component::Simulator,
                format!(
                    "history initialisation needs {} states, got {}",
                    self.horizon,
                    states.len()
                ),
            ));
        }
        let expected = (self.ncvar, self.nnode, self.nmode);
        let newest = current_step as i64;
        for (i, state) in states.iter().enumerate() {
            if state.shape() != expected {
                return Err(SimError::config(
                    Component::Simulator,
                    format!(
                        "history entry {i} has shape {:?}, expected {:?}",
                        state.shape(),
                        expected
                    ),
                ));
            }
            let time = newest - (self.horizon - 1 - i) as i64;
            let slot = self.slot_of(time);
            self.slot_mut(slot).copy_from_slice(state.data());
        }
        Ok(())
    }

    /// Store the coupling variables of the state computed at `step`.
    pub fn update(&mut self, step: u64, cvar_state: &State) {
        debug_assert_eq!(cvar_state.shape(), (self.ncvar, self.nnode, self.nmode));
        let slot = self.slot_of(step as i64);
        self.slot_mut(slot).copy_from_slice(cvar_state.data());
    }

    /// Zero-delay projection for `step`: the coupling variables of step `step - 1`.
    pub fn current(&self, step: u64, out: &mut State) {
        let slot = self.read_slot(step, 0);
        out.data_mut().copy_from_slice(self.slot(slot));
    }

    /// Coupling-variable state recorded for `time`, as long as it is still held.
    pub fn state_at(&self, time: i64) -> State {
        let mut out = State::zeros(self.ncvar, self.nnode, self.nmode);
        out.data_mut()
            .copy_from_slice(self.slot(self.slot_of(time)));
        out
    }

    /// Gather the delayed source states of every target for `step`.
    ///
    /// `idelays` is the row-major `nnode x nnode` integer delay matrix.
    pub fn query(&self, step: u64, idelays: &[usize], out: &mut DelayedState) {
        let n = self.nnode;
        debug_assert_eq!(idelays.len(), n * n);
        let block = out.block_len();
        out.data_mut()
            .chunks_mut(block)
            .enumerate()
            .for_each(|(k, dst)| self.gather_target(step, &idelays[k * n..(k + 1) * n], dst));
    }

    /// Same gather as `query`, one target per rayon task.
    #[cfg(feature = "parallel")]
    pub fn query_parallel(&self, step: u64, idelays: &[usize], out: &mut DelayedState) {
        let n = self.nnode;
        let block = out.block_len();
        out.data_mut()
            .par_chunks_mut(block)
            .enumerate()
            .for_each(|(k, dst)| self.gather_target(step, &idelays[k * n..(k + 1) * n], dst));
    }

    // dst layout: [cvar][source][mode]
    #[inline]
    fn gather_target(&self, step: u64, row_delays: &[usize], dst: &mut [f64]) {
        let (n, m) = (self.nnode, self.nmode);
        let slot_len = self.slot_len();
        for (j, &d) in row_delays.iter().enumerate() {
            let base = self.read_slot(step, d) * slot_len;
            for c in 0..self.ncvar {
                let src = base + (c * n + j) * m;
                let out = (c * n + j) * m;
                dst[out..out + m].copy_from_slice(&self.buffer[src..src + m]);
            }
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.buffer
    }

    /// Replace the raw buffer (checkpoint restore). Layout must match.
    pub fn load_raw(&mut self, raw: &[f64]) -> Result<()> {
        if raw.len() != self.buffer.len() {
            return Err(SimError::Checkpoint(format!(
                "history has {} values, expected {} (horizon {} x {} cvars x {} nodes x {} modes)",
                raw.len(),
                self.buffer.len(),
                self.horizon,
                self.ncvar,
                self.nnode,
                self.nmode
            )));
        }
        self.buffer.copy_from_slice(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(step: i64, ncvar: usize, nnode: usize) -> State {
        let mut s = State::zeros(ncvar, nnode, 1);
        for c in 0..ncvar {
            for j in 0..nnode {
                s.set(c, j, 0, step as f64 * 100.0 + (c * 10 + j) as f64);
            }
        }
        s
    }

    #[test]
    fn oversized_buffers_are_configuration_errors() {
        assert!(History::try_new(11, 2, 3, 1).is_ok());
        let err = History::try_new(1 << 20, 4, 1 << 10, 1).unwrap_err();
        assert_eq!(err.component(), Some(Component::Connectivity));
        assert!(History::try_new(usize::MAX, 2, 2, 1).is_err());
    }

    #[test]
    fn reads_return_the_value_written_delay_steps_ago() {
        let horizon = 5;
        let mut h = History::new(horizon, 2, 3, 1);
        let init: Vec<State> = (-(horizon as i64 - 1)..=0).map(|t| marker(t, 2, 3)).collect();
        h.initialize(&init, 0).unwrap();

        for step in 1..40u64 {
            for d in 0..horizon {
                let got = h.state_at(step as i64 - 1 - d as i64);
                assert_eq!(got, marker(step as i64 - 1 - d as i64, 2, 3), "step={step} d={d}");
                assert_eq!(h.read_slot(step, d), h.slot_of(step as i64 - 1 - d as i64));
            }
            h.update(step, &marker(step as i64, 2, 3));
        }
    }

    #[test]
    fn query_uses_per_edge_delays() {
        let mut h = History::new(4, 1, 2, 1);
        let init: Vec<State> = (-3..=0).map(|t| marker(t, 1, 2)).collect();
        h.initialize(&init, 0).unwrap();
        for step in 1..=6u64 {
            h.update(step, &marker(step as i64, 1, 2));
        }
        // computing step 7: target 0 sees source 1 three steps back, target 1 sees source 0 now
        let idelays = [0, 3, 0, 0];
        let mut out = DelayedState::zeros(1, 2, 1);
        h.query(7, &idelays, &mut out);
        assert_eq!(out.get(0, 0, 1, 0), marker(3, 1, 2).get(0, 1, 0));
        assert_eq!(out.get(0, 0, 0, 0), marker(6, 1, 2).get(0, 0, 0));
        assert_eq!(out.get(1, 0, 0, 0), marker(6, 1, 2).get(0, 0, 0));
    }

    #[test]
    fn zero_delay_current_is_previous_step() {
        let mut h = History::new(3, 1, 1, 1);
        h.initialize(&[marker(-2, 1, 1), marker(-1, 1, 1), marker(0, 1, 1)], 0)
            .unwrap();
        let mut cur = State::zeros(1, 1, 1);
        h.current(1, &mut cur);
        assert_eq!(cur, marker(0, 1, 1));
        h.update(1, &marker(1, 1, 1));
        h.current(2, &mut cur);
        assert_eq!(cur, marker(1, 1, 1));
    }

    #[test]
    fn initialize_checks_length_and_shape() {
        let mut h = History::new(2, 1, 2, 1);
        assert!(h.initialize(&[marker(0, 1, 2)], 0).is_err());
        assert!(h.initialize(&[marker(0, 1, 3), marker(0, 1, 3)], 0).is_err());
    }

    #[test]
    fn raw_round_trip() {
        let mut h = History::new(2, 1, 2, 1);
        h.update(1, &marker(1, 1, 2));
        let raw = h.as_slice().to_vec();
        let mut other = History::new(2, 1, 2, 1);
        other.load_raw(&raw).unwrap();
        assert_eq!(other.state_at(1), marker(1, 1, 2));
        assert!(other.load_raw(&raw[1..]).is_err());
    }
}
