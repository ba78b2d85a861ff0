//! The coupled field integrator.
//!
//! `N` scalar fields live on a shared [`SpatialGrid`] of `L` samples. At every
//! interior sample the fields exchange value through the coupling matrix,
//!
//! ```text
//! du_i/dt = sum_j c_ij * (u_j - u_i)
//!         + (-u_i + gain * f(x))              under ForcingMode::Relaxation
//!         + (-u_i + gain * f(u_i(t - tau)))   under ForcingMode::DelayedFeedback
//! ```
//!
//! Delayed feedback keeps a ring of the last `tau / dt` states and holds the
//! delayed term fixed across the stages of one step.
//!
//! while the two edge samples of field `i` are pinned to `boundary_i(t)` after
//! every step. With the default zero diffusivity samples only talk to the other
//! fields at the same position; a positive
//! [`diffusivity`](IntegratorSettings::diffusivity) adds
//! `D * (u[k-1] - 2u[k] + u[k+1])` so boundary drive reaches the interior.
//!
//! An integrator is configured once, solved once and then read. A second
//! [`CoupledFieldIntegrator::solve`] fails with [`FieldError::ReentrantSolve`].

use crate::config::{FieldSystemSpec, ForcingMode, IntegratorSettings};
use crate::coupling::CouplingMatrix;
use crate::error::{FieldError, FieldResult};
use crate::expression::ExpressionFn;
use crate::grid::SpatialGrid;
use crate::traits::{DynamicalSystem, ScalarFn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// All field profiles captured at one sampling instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: f64,
    /// `profiles[i][k]` is field `i` at grid sample `k`.
    pub profiles: Vec<Vec<f64>>,
}

impl Snapshot {
    fn capture(time: f64, fields: &[f64], grid_len: usize) -> Self {
        Self {
            time,
            profiles: fields.chunks(grid_len).map(<[f64]>::to_vec).collect(),
        }
    }

    pub fn profile(&self, field: usize) -> Option<&[f64]> {
        self.profiles.get(field).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveState {
    Configured,
    Solved,
}

/// Right-hand side over the flattened field buffer (`field * L + sample`).
///
/// Edge samples have zero rate; they are pinned after each step. When the
/// second difference reaches an edge it reads `boundary_i(t)` at the stage
/// time instead of the stored value.
struct FieldRhs<'a> {
    coupling: &'a CouplingMatrix,
    grid: &'a SpatialGrid,
    boundaries: &'a [Box<dyn ScalarFn>],
    diffusivity: f64,
    /// Per-sample drive `d` entering as `-u + d`, laid out like the fields.
    drive: Option<&'a [f64]>,
}

impl DynamicalSystem<f64> for FieldRhs<'_> {
    fn dimension(&self) -> usize {
        self.coupling.size() * self.grid.len()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let len = self.grid.len();
        let weight = self.diffusivity / self.grid.spacing().powi(2);
        for i in 0..self.coupling.size() {
            let row = i * len;
            for k in self.grid.boundary_indices() {
                out[row + k] = 0.0;
            }
            let edge = if weight != 0.0 {
                self.boundaries[i].eval(t)
            } else {
                0.0
            };
            let sample = |k: usize| {
                if self.grid.is_boundary(k) {
                    edge
                } else {
                    x[row + k]
                }
            };
            for k in self.grid.interior() {
                let idx = row + k;
                let mut rate = self.coupling.mix(i, |j| x[j * len + k]);
                if weight != 0.0 {
                    rate += weight * (sample(k - 1) - 2.0 * x[idx] + sample(k + 1));
                }
                if let Some(drive) = self.drive {
                    rate += drive[idx] - x[idx];
                }
                out[idx] = rate;
            }
        }
    }
}

pub struct CoupledFieldIntegrator {
    boundaries: Vec<Box<dyn ScalarFn>>,
    forcing: Box<dyn ScalarFn>,
    forcing_profile: Vec<f64>,
    grid: SpatialGrid,
    coupling: CouplingMatrix,
    settings: IntegratorSettings,
    fields: Vec<f64>,
    time: f64,
    state: SolveState,
    solution: Vec<Snapshot>,
}

impl CoupledFieldIntegrator {
    /// Builds an integrator with the default scheme and forcing mode.
    pub fn new(
        boundary_funcs: Vec<Box<dyn ScalarFn>>,
        time_step: f64,
        total_time: f64,
        grid_size: usize,
        coupling: &[Vec<f64>],
        forcing_func: impl ScalarFn + 'static,
    ) -> FieldResult<Self> {
        let settings = IntegratorSettings::new(time_step, total_time, grid_size);
        Self::with_settings(boundary_funcs, coupling, Box::new(forcing_func), settings)
    }

    pub fn with_settings(
        boundary_funcs: Vec<Box<dyn ScalarFn>>,
        coupling: &[Vec<f64>],
        forcing_func: Box<dyn ScalarFn>,
        settings: IntegratorSettings,
    ) -> FieldResult<Self> {
        if boundary_funcs.is_empty() {
            return Err(FieldError::config("At least one boundary function is required."));
        }
        settings.validate()?;
        let coupling = CouplingMatrix::from_rows(coupling, boundary_funcs.len())?;
        let grid = SpatialGrid::new(settings.grid_size)?;

        let forcing_profile: Vec<f64> = grid
            .positions()
            .iter()
            .map(|&x| forcing_func.eval(x))
            .collect();
        let n = boundary_funcs.len();
        let mut fields = Vec::with_capacity(n * grid.len());
        for _ in 0..n {
            fields.extend_from_slice(&forcing_profile);
        }
        pin_boundaries(&mut fields, &boundary_funcs, &grid, 0.0);

        if !coupling.is_symmetric() {
            log::debug!("coupling matrix is not symmetric; field totals are not conserved");
        }
        if settings.diffusivity * settings.time_step > 0.5 {
            log::warn!(
                "diffusivity * time_step = {} exceeds 0.5; explicit steps may oscillate",
                settings.diffusivity * settings.time_step
            );
        }

        log::debug!(
            "configured {} fields on {} samples: dt={}, T={}, {} steps, scheme {:?}",
            n,
            grid.len(),
            settings.time_step,
            settings.total_time,
            settings.step_count(),
            settings.scheme
        );

        Ok(Self {
            boundaries: boundary_funcs,
            forcing: forcing_func,
            forcing_profile,
            grid,
            coupling,
            settings,
            fields,
            time: 0.0,
            state: SolveState::Configured,
            solution: Vec::new(),
        })
    }

    /// Builds an integrator from expression strings.
    pub fn from_spec(spec: &FieldSystemSpec) -> FieldResult<Self> {
        let boundaries = spec
            .boundaries
            .iter()
            .enumerate()
            .map(|(i, source)| {
                ExpressionFn::compile(source, "t")
                    .map(|f| Box::new(f) as Box<dyn ScalarFn>)
                    .map_err(|err| {
                        FieldError::config(format!("boundary {i} ('{source}'): {err}"))
                    })
            })
            .collect::<FieldResult<Vec<_>>>()?;
        let forcing = ExpressionFn::compile(&spec.forcing, "x")
            .map_err(|err| FieldError::config(format!("forcing ('{}'): {err}", spec.forcing)))?;
        Self::with_settings(boundaries, &spec.coupling, Box::new(forcing), spec.settings)
    }

    /// Integrates over `[0, total_time]`, recording `frame_count` evenly spaced snapshots.
    ///
    /// Frame `j` is taken after step `round(j * S / (frame_count - 1))`, where `S`
    /// is [`step_count`](Self::step_count); a single frame is the initial state.
    /// When `frame_count - 1 > S` some steps are recorded more than once, so the
    /// buffer always ends up holding exactly `frame_count` snapshots.
    pub fn solve(&mut self, frame_count: usize) -> FieldResult<()> {
        if self.state == SolveState::Solved {
            return Err(FieldError::ReentrantSolve);
        }
        if frame_count == 0 {
            return Err(FieldError::config("frame_count must be at least 1."));
        }

        let steps = self.settings.step_count();
        let schedule = frame_schedule(frame_count, steps);
        if frame_count - 1 > steps {
            log::warn!(
                "frame_count {} exceeds {} steps; repeating snapshots of shared steps",
                frame_count,
                steps
            );
        }

        let len = self.grid.len();
        let dim = self.fields.len();
        let mut drive = match self.settings.forcing_mode {
            ForcingMode::Initial => Vec::new(),
            ForcingMode::Relaxation { gain } => {
                let source = self.forcing_profile.iter().map(|f| gain * f);
                source.cycle().take(dim).collect()
            }
            ForcingMode::DelayedFeedback { .. } => vec![0.0; dim],
        };
        // Ring of past states; the front is the one a step feeds back on.
        let mut history: VecDeque<Vec<f64>> = match self.settings.feedback_lag() {
            Some(lag) => std::iter::repeat_with(|| self.fields.clone())
                .take(lag + 1)
                .collect(),
            None => VecDeque::new(),
        };

        let mut stepper = self.settings.scheme.build::<f64>(dim);
        let mut frames = schedule.iter().copied().peekable();
        let mut t = 0.0;

        self.solution.reserve_exact(frame_count);
        while frames.next_if_eq(&0).is_some() {
            self.solution.push(Snapshot::capture(t, &self.fields, len));
        }

        for k in 1..=steps {
            if let (ForcingMode::DelayedFeedback { gain, .. }, Some(past)) =
                (self.settings.forcing_mode, history.front())
            {
                for (d, &u) in drive.iter_mut().zip(past) {
                    *d = gain * self.forcing.eval(u);
                }
            }
            let rhs = FieldRhs {
                coupling: &self.coupling,
                grid: &self.grid,
                boundaries: &self.boundaries,
                diffusivity: self.settings.diffusivity,
                drive: (!drive.is_empty()).then_some(drive.as_slice()),
            };

            let target = self.settings.time_at(k);
            let dt = target - t;
            stepper.step(&rhs, &mut t, &mut self.fields, dt);
            t = target;
            pin_boundaries(&mut self.fields, &self.boundaries, &self.grid, t);

            if let Some(mut slot) = history.pop_front() {
                slot.copy_from_slice(&self.fields);
                history.push_back(slot);
            }

            while frames.next_if_eq(&k).is_some() {
                log::trace!("frame {} at step {k}, t={t}", self.solution.len());
                self.solution.push(Snapshot::capture(t, &self.fields, len));
            }
        }

        self.time = t;
        self.state = SolveState::Solved;

        if self.fields.iter().any(|v| !v.is_finite()) {
            log::warn!("non-finite values in final state at t={t}; integration diverged");
        }
        log::debug!(
            "solved {} steps to t={}, captured {} snapshots",
            steps,
            t,
            self.solution.len()
        );
        Ok(())
    }

    /// Captured snapshots in order. Empty before [`solve`](Self::solve).
    pub fn solution_data(&self) -> &[Snapshot] {
        &self.solution
    }

    /// Time series of one field as `(times, profiles)` columns.
    pub fn field_series(&self, field: usize) -> FieldResult<(Vec<f64>, Vec<Vec<f64>>)> {
        self.check_field(field)?;
        Ok(self
            .solution
            .iter()
            .map(|snap| (snap.time, snap.profiles[field].clone()))
            .unzip())
    }

    /// Live values of one field: the initial state before solving, the final state after.
    pub fn current_profile(&self, field: usize) -> FieldResult<&[f64]> {
        self.check_field(field)?;
        let len = self.grid.len();
        Ok(&self.fields[field * len..(field + 1) * len])
    }

    pub fn field_count(&self) -> usize {
        self.boundaries.len()
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn coupling(&self) -> &CouplingMatrix {
        &self.coupling
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn forcing_profile(&self) -> &[f64] {
        &self.forcing_profile
    }

    pub fn state(&self) -> SolveState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_count(&self) -> usize {
        self.settings.step_count()
    }

    fn check_field(&self, field: usize) -> FieldResult<()> {
        let count = self.field_count();
        if field >= count {
            return Err(FieldError::FieldIndex {
                index: field,
                count,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CoupledFieldIntegrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoupledFieldIntegrator")
            .field("fields", &self.field_count())
            .field("grid_size", &self.grid.len())
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("snapshots", &self.solution.len())
            .finish()
    }
}

fn pin_boundaries(fields: &mut [f64], boundaries: &[Box<dyn ScalarFn>], grid: &SpatialGrid, t: f64) {
    let len = grid.len();
    for (i, boundary) in boundaries.iter().enumerate() {
        let value = boundary.eval(t);
        for k in grid.boundary_indices() {
            fields[i * len + k] = value;
        }
    }
}

/// Step index recorded by each frame. Non-decreasing, starts at 0, ends at
/// `steps` when `frames > 1`.
fn frame_schedule(frames: usize, steps: usize) -> Vec<usize> {
    if frames == 1 {
        return vec![0];
    }
    let span = frames - 1;
    (0..frames)
        .map(|j| (2 * j * steps + span) / (2 * span))
        .collect()
}
