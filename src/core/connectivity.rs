#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use tracing::{debug, warn};

use crate::error::{Component, Result, SimError};

/// Conduction speed used when the configured one is missing or invalid (mm/ms).
pub const DEFAULT_SPEED: f64 = 3.0;

/// Longest delay accepted, in integration steps.
pub const MAX_DELAY_STEPS: usize = 1 << 20;

/// Axonal conduction velocity.
///
/// A per-region speed applies to the tracts leaving that (source) region.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Speed {
    Uniform(f64),
    PerRegion(Vec<f64>),
}

impl Default for Speed {
    fn default() -> Self {
        Speed::Uniform(DEFAULT_SPEED)
    }
}

impl Speed {
    #[inline]
    fn for_source(&self, source: usize) -> f64 {
        match self {
            Speed::Uniform(v) => *v,
            Speed::PerRegion(values) => values[source],
        }
    }

    fn is_valid(&self, n: usize) -> bool {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        match self {
            Speed::Uniform(v) => ok(*v),
            Speed::PerRegion(values) => values.len() == n && values.iter().all(|v| ok(*v)),
        }
    }
}

/// Weight normalisation modes for `Connectivity::scaled_weights`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WeightScaling {
    #[default]
    None,
    /// Divide every weight by the largest absolute weight.
    Tract,
    /// Divide each target row by its largest absolute weight.
    Region,
}

/// Weighted, delayed region-to-region graph.
///
/// `weights[k * n + j]` is the strength of the connection from source `j`
/// to target `k` (target rows, source columns). The same convention holds for
/// `tract_lengths`, `delays` and `idelays`.
#[derive(Debug, Clone)]
pub struct Connectivity {
    n: usize,
    weights: Vec<f64>,
    tract_lengths: Vec<f64>,
    speed: Speed,
    centres: Option<Vec<[f64; 3]>>,
    region_labels: Vec<String>,

    delays: Vec<f64>,
    idelays: Vec<usize>,
    dt: Option<f64>,
    configured: bool,
}

impl Connectivity {
    /// Build from row-major `n x n` weights and tract lengths.
    ///
    /// An empty `tract_lengths` is allowed when centres are supplied later;
    /// `configure()` then derives them.
    pub fn new(weights: Vec<f64>, tract_lengths: Vec<f64>) -> Result<Self> {
        let n = square_side(weights.len()).ok_or_else(|| {
            SimError::config(
                Component::Connectivity,
                format!("weights has {} entries, which is not a square matrix", weights.len()),
            )
        })?;
        if !tract_lengths.is_empty() && tract_lengths.len() != weights.len() {
            return Err(SimError::config(
                Component::Connectivity,
                format!(
                    "tract_lengths has {} entries but weights is {n}x{n}",
                    tract_lengths.len()
                ),
            ));
        }
        Ok(Self {
            n,
            weights,
            tract_lengths,
            speed: Speed::default(),
            centres: None,
            region_labels: (0..n).map(|i| format!("r{i}")).collect(),
            delays: Vec::new(),
            idelays: Vec::new(),
            dt: None,
            configured: false,
        })
    }

    /// Build from nested rows, e.g. `[[0, 1], [1, 0]]`.
    pub fn from_rows(weights: &[Vec<f64>], tract_lengths: &[Vec<f64>]) -> Result<Self> {
        let flat = |rows: &[Vec<f64>]| -> Result<Vec<f64>> {
            let n = rows.len();
            if rows.iter().any(|r| r.len() != n) {
                return Err(SimError::config(
                    Component::Connectivity,
                    "matrix rows must all have length equal to the number of rows",
                ));
            }
            Ok(rows.iter().flat_map(|r| r.iter().copied()).collect())
        };
        Self::new(flat(weights)?, flat(tract_lengths)?)
    }

    pub fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self.configured = false;
        self
    }

    pub fn with_centres(mut self, centres: Vec<[f64; 3]>) -> Self {
        self.centres = Some(centres);
        self
    }

    pub fn with_region_labels(mut self, labels: Vec<String>) -> Self {
        self.region_labels = labels;
        self
    }

    /// Change the conduction speed. Delays must be recomputed before stepping.
    pub fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
        self.configured = false;
        self.idelays.clear();
        self.dt = None;
    }

    /// Validate shapes and derive physical delays.
    pub fn configure(&mut self) -> Result<()> {
        let n = self.n;
        if n == 0 {
            return Err(SimError::config(
                Component::Connectivity,
                "connectivity has no regions",
            ));
        }
        if self.weights.iter().any(|w| !w.is_finite()) {
            return Err(SimError::config(
                Component::Connectivity,
                "weights contain non-finite values",
            ));
        }
        if self.region_labels.len() != n {
            return Err(SimError::config(
                Component::Connectivity,
                format!(
                    "{} region labels for {n} regions",
                    self.region_labels.len()
                ),
            ));
        }
        if self.tract_lengths.is_empty() {
            self.compute_tract_lengths()?;
        }
        if let Some(pos) = self
            .tract_lengths
            .iter()
            .position(|l| !l.is_finite() || *l < 0.0)
        {
            return Err(SimError::config(
                Component::Connectivity,
                format!(
                    "tract length from region {} to region {} is {} (must be finite and >= 0)",
                    pos % n,
                    pos / n,
                    self.tract_lengths[pos]
                ),
            ));
        }

        if !self.speed.is_valid(n) {
            warn!(
                speed = ?self.speed,
                "invalid conduction speed; falling back to {DEFAULT_SPEED}"
            );
            self.speed = Speed::Uniform(DEFAULT_SPEED);
        }

        self.delays = Vec::with_capacity(n * n);
        for k in 0..n {
            for j in 0..n {
                self.delays
                    .push(self.tract_lengths[k * n + j] / self.speed.for_source(j));
            }
        }
        self.configured = true;
        self.idelays.clear();
        self.dt = None;
        Ok(())
    }

    /// Euclidean distances between region centres.
    pub fn compute_tract_lengths(&mut self) -> Result<()> {
        let centres = self.centres.as_ref().ok_or_else(|| {
            SimError::config(
                Component::Connectivity,
                "tract_lengths are empty and no region centres are available to derive them",
            )
        })?;
        if centres.len() != self.n {
            return Err(SimError::config(
                Component::Connectivity,
                format!("{} centres for {} regions", centres.len(), self.n),
            ));
        }
        let n = self.n;
        let mut lengths = vec![0.0; n * n];
        for k in 0..n {
            for j in 0..n {
                let (a, b) = (centres[k], centres[j]);
                let d2 = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2);
                lengths[k * n + j] = d2.sqrt();
            }
        }
        self.tract_lengths = lengths;
        Ok(())
    }

    /// Convert physical delays into integer step counts for `dt`.
    pub fn set_idelays(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::config(
                Component::Connectivity,
                format!("integration step dt must be finite and > 0, got {dt}"),
            ));
        }
        if !self.configured {
            self.configure()?;
        }
        let mut idelays = Vec::with_capacity(self.delays.len());
        for &d in &self.delays {
            let steps = (d / dt).round_ties_even();
            if !steps.is_finite() || steps < 0.0 {
                return Err(SimError::config(
                    Component::Connectivity,
                    format!("delay {d} cannot be expressed in steps of {dt}"),
                ));
            }
            if steps > MAX_DELAY_STEPS as f64 {
                return Err(SimError::config(
                    Component::Connectivity,
                    format!(
                        "delay {d} is {steps} steps of {dt}, above the limit of {MAX_DELAY_STEPS}"
                    ),
                ));
            }
            idelays.push(steps as usize);
        }
        self.idelays = idelays;
        self.dt = Some(dt);
        debug!(dt, horizon = self.horizon(), "integer delays computed");
        Ok(())
    }

    /// Ring-buffer depth: the longest delay in steps plus one.
    ///
    /// Only meaningful after `set_idelays`; returns 1 before that.
    pub fn horizon(&self) -> usize {
        self.idelays.iter().copied().max().unwrap_or(0) + 1
    }

    #[inline]
    pub fn number_of_regions(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn weight(&self, target: usize, source: usize) -> f64 {
        self.weights[target * self.n + source]
    }

    pub fn tract_lengths(&self) -> &[f64] {
        &self.tract_lengths
    }

    pub fn delays(&self) -> &[f64] {
        &self.delays
    }

    pub fn idelays(&self) -> &[usize] {
        &self.idelays
    }

    #[inline]
    pub fn idelay(&self, target: usize, source: usize) -> usize {
        self.idelays[target * self.n + source]
    }

    pub fn speed(&self) -> &Speed {
        &self.speed
    }

    pub fn centres(&self) -> Option<&[[f64; 3]]> {
        self.centres.as_deref()
    }

    pub fn region_labels(&self) -> &[String] {
        &self.region_labels
    }

    /// `dt` used for the current integer delays.
    pub fn idelays_dt(&self) -> Option<f64> {
        self.dt
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Sum of afferent weights of `target`.
    pub fn in_strength(&self, target: usize) -> f64 {
        self.weights[target * self.n..(target + 1) * self.n]
            .iter()
            .sum()
    }

    pub fn is_undirected(&self) -> bool {
        let n = self.n;
        (0..n).all(|k| (0..k).all(|j| self.weights[k * n + j] == self.weights[j * n + k]))
    }

    pub fn remove_self_connections(&mut self) {
        for i in 0..self.n {
            self.weights[i * self.n + i] = 0.0;
        }
    }

    /// Normalised copy of the weights; zero rows/matrices are returned unchanged.
    pub fn scaled_weights(&self, mode: WeightScaling) -> Vec<f64> {
        let n = self.n;
        match mode {
            WeightScaling::None => self.weights.clone(),
            WeightScaling::Tract => {
                let max = self.weights.iter().fold(0.0f64, |m, w| m.max(w.abs()));
                if max == 0.0 {
                    return self.weights.clone();
                }
                self.weights.iter().map(|w| w / max).collect()
            }
            WeightScaling::Region => {
                let mut out = self.weights.clone();
                for row in out.chunks_mut(n) {
                    let max = row.iter().fold(0.0f64, |m, w| m.max(w.abs()));
                    if max > 0.0 {
                        row.iter_mut().for_each(|w| *w /= max);
                    }
                }
                out
            }
        }
    }

    /// Replace the weights with a normalised version.
    pub fn apply_weight_scaling(&mut self, mode: WeightScaling) {
        self.weights = self.scaled_weights(mode);
    }
}

fn square_side(len: usize) -> Option<usize> {
    let n = (len as f64).sqrt().round() as usize;
    (n * n == len).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_region() -> Connectivity {
        Connectivity::from_rows(
            &[vec![0.0, 1.0], vec![1.0, 0.0]],
            &[vec![0.0, 10.0], vec![10.0, 0.0]],
        )
        .unwrap()
        .with_speed(Speed::Uniform(1.0))
    }

    #[test]
    fn idelays_and_horizon_for_two_regions() {
        let mut conn = two_region();
        conn.configure().unwrap();
        conn.set_idelays(1.0).unwrap();
        assert_eq!(conn.idelays(), &[0, 10, 10, 0]);
        assert_eq!(conn.horizon(), 11);
    }

    #[test]
    fn idelays_round_half_to_even() {
        let mut conn = Connectivity::from_rows(
            &[vec![0.0, 1.0], vec![1.0, 0.0]],
            &[vec![0.0, 2.5], vec![3.5, 0.0]],
        )
        .unwrap()
        .with_speed(Speed::Uniform(1.0));
        conn.set_idelays(1.0).unwrap();
        assert_eq!(conn.idelay(0, 1), 2);
        assert_eq!(conn.idelay(1, 0), 4);
    }

    #[test]
    fn delays_beyond_the_step_limit_are_rejected() {
        let mut conn = two_region();
        let err = conn.set_idelays(1e-6).unwrap_err();
        assert_eq!(err.component(), Some(Component::Connectivity));
        assert!(conn.idelays().is_empty());
    }

    #[test]
    fn invalid_speed_falls_back_to_default() {
        let mut conn = two_region().with_speed(Speed::Uniform(0.0));
        conn.configure().unwrap();
        assert_eq!(conn.speed(), &Speed::Uniform(DEFAULT_SPEED));
        conn.set_idelays(0.5).unwrap();
        // 10 / 3 / 0.5 = 6.67 -> 7
        assert_eq!(conn.idelay(0, 1), 7);
    }

    #[test]
    fn per_region_speed_uses_source_region() {
        let mut conn = two_region().with_speed(Speed::PerRegion(vec![1.0, 2.0]));
        conn.set_idelays(1.0).unwrap();
        // 0 <- 1 travels at region 1's speed.
        assert_eq!(conn.idelay(0, 1), 5);
        assert_eq!(conn.idelay(1, 0), 10);
    }

    #[test]
    fn tract_lengths_from_centres() {
        let mut conn = Connectivity::new(vec![0.0, 1.0, 1.0, 0.0], Vec::new())
            .unwrap()
            .with_centres(vec![[0.0, 0.0, 0.0], [3.0, 4.0, 0.0]]);
        conn.configure().unwrap();
        assert_eq!(conn.tract_lengths(), &[0.0, 5.0, 5.0, 0.0]);
    }

    #[test]
    fn missing_tracts_without_centres_is_an_error() {
        let mut conn = Connectivity::new(vec![0.0; 4], Vec::new()).unwrap();
        let err = conn.configure().unwrap_err();
        assert_eq!(err.component(), Some(Component::Connectivity));
    }

    #[test]
    fn non_square_weights_rejected() {
        assert!(Connectivity::new(vec![0.0; 3], Vec::new()).is_err());
        assert!(Connectivity::new(vec![0.0; 4], vec![0.0; 9]).is_err());
    }

    #[test]
    fn negative_tract_length_rejected() {
        let mut conn = Connectivity::new(vec![0.0; 4], vec![0.0, -1.0, 1.0, 0.0]).unwrap();
        assert!(conn.configure().is_err());
    }

    #[test]
    fn non_positive_dt_rejected() {
        let mut conn = two_region();
        assert!(conn.set_idelays(0.0).is_err());
        assert!(conn.set_idelays(f64::NAN).is_err());
    }

    #[test]
    fn weight_scaling_modes() {
        let conn = Connectivity::new(vec![0.0, 2.0, 4.0, 0.0], vec![0.0; 4]).unwrap();
        assert_eq!(conn.scaled_weights(WeightScaling::Tract), vec![0.0, 0.5, 1.0, 0.0]);
        assert_eq!(conn.scaled_weights(WeightScaling::Region), vec![0.0, 1.0, 1.0, 0.0]);
        assert!(!conn.is_undirected());
        assert_eq!(conn.in_strength(1), 4.0);
    }
}
