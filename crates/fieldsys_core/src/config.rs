use crate::error::{FieldError, FieldResult};
use crate::solvers::Scheme;
use serde::{Deserialize, Serialize};

/// Runs longer than this many steps are rejected at construction.
pub const MAX_STEPS: f64 = u32::MAX as f64;

/// How the forcing profile enters the dynamics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ForcingMode {
    /// The profile only seeds the initial field values.
    #[default]
    Initial,
    /// The profile also acts every step as a fixed source, `-u + gain * f(x)`.
    Relaxation { gain: f64 },
    /// Delayed self-feedback `-u + gain * f(u(t - delay))`: the forcing function
    /// is applied to each sample's own value one delay earlier. Times before 0
    /// read the initial state. The delay is rounded to whole steps.
    DelayedFeedback { gain: f64, delay: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub time_step: f64,
    pub total_time: f64,
    pub grid_size: usize,
    pub scheme: Scheme,
    pub forcing_mode: ForcingMode,
    /// Weight of the second-difference term `u[k-1] - 2u[k] + u[k+1]` along the
    /// grid. Zero keeps samples independent of their neighbours.
    pub diffusivity: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            time_step: 0.1,
            total_time: 1.0,
            grid_size: 100,
            scheme: Scheme::Euler,
            forcing_mode: ForcingMode::Initial,
            diffusivity: 0.0,
        }
    }
}

impl IntegratorSettings {
    pub fn new(time_step: f64, total_time: f64, grid_size: usize) -> Self {
        Self {
            time_step,
            total_time,
            grid_size,
            ..Self::default()
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_forcing_mode(mut self, forcing_mode: ForcingMode) -> Self {
        self.forcing_mode = forcing_mode;
        self
    }

    pub fn with_diffusivity(mut self, diffusivity: f64) -> Self {
        self.diffusivity = diffusivity;
        self
    }

    pub fn validate(&self) -> FieldResult<()> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(FieldError::config(format!(
                "time_step must be positive and finite, got {}.",
                self.time_step
            )));
        }
        if !(self.total_time.is_finite() && self.total_time > 0.0) {
            return Err(FieldError::config(format!(
                "total_time must be positive and finite, got {}.",
                self.total_time
            )));
        }
        if self.grid_size == 0 {
            return Err(FieldError::config("grid_size must be at least 1."));
        }
        if self.total_time / self.time_step > MAX_STEPS {
            return Err(FieldError::config(format!(
                "total_time / time_step exceeds the limit of {MAX_STEPS} steps."
            )));
        }
        if !(self.diffusivity.is_finite() && self.diffusivity >= 0.0) {
            return Err(FieldError::config(format!(
                "diffusivity must be non-negative and finite, got {}.",
                self.diffusivity
            )));
        }
        match self.forcing_mode {
            ForcingMode::Initial => {}
            ForcingMode::Relaxation { gain } if !gain.is_finite() => {
                return Err(FieldError::config("Relaxation gain must be finite."));
            }
            ForcingMode::DelayedFeedback { gain, delay } => {
                if !gain.is_finite() {
                    return Err(FieldError::config("Feedback gain must be finite."));
                }
                if !(delay.is_finite() && delay >= 0.0) {
                    return Err(FieldError::config(format!(
                        "Feedback delay must be non-negative and finite, got {delay}."
                    )));
                }
            }
            ForcingMode::Relaxation { .. } => {}
        }
        Ok(())
    }

    /// Whole steps between a sample and the past value it feeds back on,
    /// or `None` when the forcing mode has no delay.
    pub fn feedback_lag(&self) -> Option<usize> {
        match self.forcing_mode {
            ForcingMode::DelayedFeedback { delay, .. } => {
                let lag = (delay / self.time_step).round() as usize;
                Some(lag.min(self.step_count()))
            }
            _ => None,
        }
    }

    /// Number of explicit steps needed to cover `[0, total_time]`.
    ///
    /// A ratio within a relative `1e-9` of an integer counts as that integer,
    /// so `1.0 / 0.1` gives 10 steps rather than 11.
    pub fn step_count(&self) -> usize {
        let ratio = self.total_time / self.time_step;
        let nearest = ratio.round();
        let steps = if (ratio - nearest).abs() <= 1e-9 * nearest.max(1.0) {
            nearest
        } else {
            ratio.ceil()
        };
        steps.max(1.0) as usize
    }

    /// Simulated time at the end of step `k`. The last step ends exactly at `total_time`.
    pub fn time_at(&self, k: usize) -> f64 {
        if k >= self.step_count() {
            self.total_time
        } else {
            k as f64 * self.time_step
        }
    }
}

/// A run described entirely as data: expressions instead of closures.
///
/// Boundary expressions are in `t`, the forcing expression is in `x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSystemSpec {
    pub boundaries: Vec<String>,
    pub coupling: Vec<Vec<f64>>,
    pub forcing: String,
    #[serde(default)]
    pub settings: IntegratorSettings,
}
