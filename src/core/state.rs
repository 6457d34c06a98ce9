//! Dense numeric containers shared by every stage of the step loop.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Component, Result, SimError};

/// Dense `(nvar, nnode, nmode)` array stored as `[var][node][mode]`.
///
/// Used for the model state, derivatives, coupling input and monitor output.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawState"))]
pub struct State {
    nvar: usize,
    nnode: usize,
    nmode: usize,
    data: Vec<f64>,
}

impl State {
    pub fn zeros(nvar: usize, nnode: usize, nmode: usize) -> Self {
        Self {
            nvar,
            nnode,
            nmode,
            data: vec![0.0; nvar * nnode * nmode],
        }
    }

    pub fn filled(nvar: usize, nnode: usize, nmode: usize, value: f64) -> Self {
        Self {
            nvar,
            nnode,
            nmode,
            data: vec![value; nvar * nnode * nmode],
        }
    }

    pub fn from_vec(nvar: usize, nnode: usize, nmode: usize, data: Vec<f64>) -> Result<Self> {
        let expected = nvar.checked_mul(nnode).and_then(|n| n.checked_mul(nmode));
        if expected != Some(data.len()) {
            return Err(SimError::config(
                Component::Simulator,
                format!(
                    "state data has {} values, expected {}x{}x{}",
                    data.len(),
                    nvar,
                    nnode,
                    nmode
                ),
            ));
        }
        Ok(Self {
            nvar,
            nnode,
            nmode,
            data,
        })
    }

    /// Single-mode state from one row of node values per variable.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let nvar = rows.len();
        let nnode = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != nnode) {
            return Err(SimError::config(
                Component::Simulator,
                "state rows have inconsistent node counts",
            ));
        }
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_vec(nvar, nnode, 1, data)
    }

    #[inline]
    pub fn nvar(&self) -> usize {
        self.nvar
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
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nvar, self.nnode, self.nmode)
    }

    #[inline]
    pub fn index(&self, var: usize, node: usize, mode: usize) -> usize {
        (var * self.nnode + node) * self.nmode + mode
    }

    #[inline]
    pub fn get(&self, var: usize, node: usize, mode: usize) -> f64 {
        self.data[self.index(var, node, mode)]
    }

    #[inline]
    pub fn set(&mut self, var: usize, node: usize, mode: usize, value: f64) {
        let i = self.index(var, node, mode);
        self.data[i] = value;
    }

    /// All `(node, mode)` values of one variable.
    #[inline]
    pub fn var(&self, var: usize) -> &[f64] {
        let len = self.nnode * self.nmode;
        &self.data[var * len..(var + 1) * len]
    }

    #[inline]
    pub fn var_mut(&mut self, var: usize) -> &mut [f64] {
        let len = self.nnode * self.nmode;
        &mut self.data[var * len..(var + 1) * len]
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn same_shape(&self, other: &State) -> bool {
        self.shape() == other.shape()
    }

    /// Copy values from `other`; shapes must match.
    pub fn copy_from(&mut self, other: &State) {
        debug_assert!(self.same_shape(other));
        self.data.copy_from_slice(&other.data);
    }

    /// Gather a subset of variables into a new state.
    pub fn select_vars(&self, vars: &[usize]) -> State {
        let mut out = State::zeros(vars.len(), self.nnode, self.nmode);
        for (dst, &src) in vars.iter().enumerate() {
            out.var_mut(dst).copy_from_slice(self.var(src));
        }
        out
    }

    /// Like `select_vars`, writing into an existing buffer.
    pub fn select_vars_into(&self, vars: &[usize], out: &mut State) {
        for (dst, &src) in vars.iter().enumerate() {
            out.var_mut(dst).copy_from_slice(self.var(src));
        }
    }

    /// First non-finite entry as `(var, node, mode)`.
    pub fn first_non_finite(&self) -> Option<(usize, usize, usize)> {
        let pos = self.data.iter().position(|x| !x.is_finite())?;
        let per_var = self.nnode * self.nmode;
        let var = pos / per_var;
        let rem = pos % per_var;
        Some((var, rem / self.nmode, rem % self.nmode))
    }

    /// Mean of one variable over nodes and modes.
    pub fn var_mean(&self, var: usize) -> f64 {
        let values = self.var(var);
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Unchecked wire form of [`State`]; deserialisation goes through `from_vec`.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawState {
    nvar: usize,
    nnode: usize,
    nmode: usize,
    data: Vec<f64>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawState> for State {
    type Error = SimError;

    fn try_from(raw: RawState) -> Result<Self> {
        State::from_vec(raw.nvar, raw.nnode, raw.nmode, raw.data)
    }
}

/// Delayed coupling-variable states gathered for every target node.
///
/// Layout is `[target][cvar][source][mode]` so one target's gather is a
/// contiguous block.
#[derive(Debug, Clone)]
pub struct DelayedState {
    ncvar: usize,
    nnode: usize,
    nmode: usize,
    data: Vec<f64>,
}

impl DelayedState {
    pub fn zeros(ncvar: usize, nnode: usize, nmode: usize) -> Self {
        Self {
            ncvar,
            nnode,
            nmode,
            data: vec![0.0; nnode * ncvar * nnode * nmode],
        }
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
    pub fn block_len(&self) -> usize {
        self.ncvar * self.nnode * self.nmode
    }

    #[inline]
    pub fn get(&self, target: usize, cvar: usize, source: usize, mode: usize) -> f64 {
        let i = ((target * self.ncvar + cvar) * self.nnode + source) * self.nmode + mode;
        self.data[i]
    }

    /// Gathered block of one target node, laid out `[cvar][source][mode]`.
    #[inline]
    pub fn target(&self, target: usize) -> &[f64] {
        let len = self.block_len();
        &self.data[target * len..(target + 1) * len]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// Model parameter that is either shared or set per node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Parameter {
    Scalar(f64),
    PerNode(Vec<f64>),
}

impl Parameter {
    #[inline]
    pub fn at(&self, node: usize) -> f64 {
        match self {
            Parameter::Scalar(v) => *v,
            Parameter::PerNode(values) => values[node],
        }
    }

    pub fn validate(&self, name: &str, nnode: usize) -> Result<()> {
        match self {
            Parameter::Scalar(v) if !v.is_finite() => Err(SimError::config(
                Component::Model,
                format!("parameter `{name}` is not finite"),
            )),
            Parameter::PerNode(values) if values.len() != nnode => Err(SimError::config(
                Component::Model,
                format!(
                    "parameter `{name}` has {} per-node values but the network has {nnode} nodes",
                    values.len()
                ),
            )),
            Parameter::PerNode(values) if values.iter().any(|v| !v.is_finite()) => Err(
                SimError::config(Component::Model, format!("parameter `{name}` is not finite")),
            ),
            _ => Ok(()),
        }
    }
}

impl From<f64> for Parameter {
    fn from(v: f64) -> Self {
        Parameter::Scalar(v)
    }
}

impl From<Vec<f64>> for Parameter {
    fn from(values: Vec<f64>) -> Self {
        Parameter::PerNode(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_var_node_mode() {
        let mut s = State::zeros(2, 3, 2);
        s.set(1, 2, 1, 5.0);
        assert_eq!(s.data()[s.data().len() - 1], 5.0);
        assert_eq!(s.var(1)[5], 5.0);
        assert_eq!(s.get(1, 2, 1), 5.0);
    }

    #[test]
    fn from_vec_rejects_bad_length() {
        assert!(State::from_vec(2, 2, 1, vec![0.0; 3]).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialising_checks_the_data_length() {
        let ok: State =
            serde_json::from_str(r#"{"nvar":1,"nnode":2,"nmode":1,"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(ok.shape(), (1, 2, 1));
        let short = serde_json::from_str::<State>(r#"{"nvar":1,"nnode":2,"nmode":1,"data":[0.0]}"#);
        assert!(short.is_err());
    }

    #[test]
    fn first_non_finite_reports_position() {
        let mut s = State::zeros(2, 3, 1);
        assert_eq!(s.first_non_finite(), None);
        s.set(1, 1, 0, f64::NAN);
        assert_eq!(s.first_non_finite(), Some((1, 1, 0)));
    }

    #[test]
    fn select_vars_keeps_order() {
        let s = State::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let sub = s.select_vars(&[2, 0]);
        assert_eq!(sub.data(), &[5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn per_node_parameter_length_is_checked() {
        let p = Parameter::PerNode(vec![1.0, 2.0]);
        assert!(p.validate("a", 2).is_ok());
        assert!(p.validate("a", 3).is_err());
        assert_eq!(Parameter::Scalar(4.0).at(17), 4.0);
    }
}
