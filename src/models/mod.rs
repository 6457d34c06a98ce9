//! Neural-mass models: the derivative functions the integrators advance.
//!
//! A model only sees state-shaped arrays. Long-range coupling arrives as a
//! `(ncvar, nnode, nmode)` array ordered like `cvar()`; local coupling is the
//! surface operator applied to every state variable (zeros for region-level
//! simulations).

use core::fmt;

use crate::error::{Component, Result, SimError};
use crate::prng::Prng;
use crate::state::{Parameter, State};

mod generic_2d_oscillator;
mod jansen_rit;
mod kuramoto;
mod linear;
mod wilson_cowan;

pub use generic_2d_oscillator::Generic2dOscillator;
pub use jansen_rit::JansenRit;
pub use kuramoto::Kuramoto;
pub use linear::Linear;
pub use wilson_cowan::WilsonCowan;

pub trait Model: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn state_variables(&self) -> &[&'static str];

    #[inline]
    fn nvar(&self) -> usize {
        self.state_variables().len()
    }

    fn number_of_modes(&self) -> usize {
        1
    }

    /// Indices of the state variables propagated through the connectome.
    fn cvar(&self) -> &[usize];

    /// Indices of the state variables monitors record by default.
    fn variables_of_interest(&self) -> &[usize];

    /// Range used to draw random initial conditions, one entry per variable.
    fn state_variable_range(&self) -> &[(f64, f64)];

    /// Hard bounds enforced by the integrators as `(variable, (low, high))`.
    fn state_variable_boundaries(&self) -> Vec<(usize, (f64, f64))> {
        Vec::new()
    }

    /// Variables a stimulus is added to.
    fn stimulated_variables(&self) -> &[usize] {
        &[0]
    }

    /// Check parameters against the node count.
    fn validate(&self, nnode: usize) -> Result<()> {
        check_indices(self, "cvar", self.cvar())?;
        check_indices(self, "variables_of_interest", self.variables_of_interest())?;
        check_indices(self, "stimulated_variables", self.stimulated_variables())?;
        if self.state_variable_range().len() != self.nvar() {
            return Err(SimError::config(
                Component::Model,
                format!(
                    "{}: {} state variable ranges for {} variables",
                    self.name(),
                    self.state_variable_range().len(),
                    self.nvar()
                ),
            ));
        }
        for (name, p) in self.parameters() {
            p.validate(name, nnode)?;
        }
        Ok(())
    }

    /// Named parameters, used for validation.
    fn parameters(&self) -> Vec<(&'static str, &Parameter)>;

    /// Recompute values derived from parameters. Called once per `configure()`.
    fn update_derived_parameters(&mut self) {}

    /// Time derivative of `x` given long-range coupling `c` and local coupling `lc`.
    ///
    /// Must not mutate the model: any value that evolves belongs in the state.
    fn dfun(&self, x: &State, c: &State, lc: &State, dx: &mut State);

    /// Random state drawn uniformly inside `state_variable_range`.
    fn initial(&self, rng: &mut Prng, nnode: usize) -> State {
        let ranges = self.state_variable_range();
        let mut x = State::zeros(self.nvar(), nnode, self.number_of_modes());
        for (v, &(lo, hi)) in ranges.iter().enumerate() {
            for value in x.var_mut(v) {
                *value = rng.gen_range_f64(lo, hi);
            }
        }
        x
    }
}

fn check_indices<M: Model + ?Sized>(model: &M, what: &str, indices: &[usize]) -> Result<()> {
    if let Some(&bad) = indices.iter().find(|&&i| i >= model.nvar()) {
        return Err(SimError::config(
            Component::Model,
            format!(
                "{}: {what} index {bad} out of range for {} state variables",
                model.name(),
                model.nvar()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_draws_stay_in_range() {
        let model = Generic2dOscillator::default();
        let mut rng = Prng::new(5);
        let x = model.initial(&mut rng, 16);
        for (v, &(lo, hi)) in model.state_variable_range().iter().enumerate() {
            assert!(x.var(v).iter().all(|&val| val >= lo && val < hi));
        }
    }

    #[test]
    fn bad_voi_index_is_rejected() {
        let model = Linear {
            variables_of_interest: vec![3],
            ..Linear::default()
        };
        let err = model.validate(2).unwrap_err();
        assert_eq!(err.component(), Some(Component::Model));
    }

    #[test]
    fn per_node_parameter_must_match_network() {
        let model = Linear {
            gamma: Parameter::PerNode(vec![-1.0, -2.0]),
            ..Linear::default()
        };
        assert!(model.validate(2).is_ok());
        assert!(model.validate(3).is_err());
    }
}
