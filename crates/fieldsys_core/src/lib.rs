//! The `fieldsys_core` crate integrates a small set of scalar fields that share a
//! one-dimensional grid and exchange value through a coupling matrix.
//!
//! Key components:
//! - **Traits**: `Scalar`, `ScalarFn` (boundary/forcing callables), `DynamicalSystem`, `Steppable`.
//! - **System**: `CoupledFieldIntegrator`, configured once, solved once, then read as snapshots.
//! - **Solvers**: Explicit fixed-step schemes (Euler, Midpoint, RK4).
//! - **Expression**: A bytecode VM for boundary and forcing functions given as text.
pub mod config;
pub mod coupling;
pub mod error;
pub mod expression;
pub mod grid;
pub mod solvers;
pub mod system;
pub mod traits;

pub use config::{FieldSystemSpec, ForcingMode, IntegratorSettings};
pub use error::{FieldError, FieldResult};
pub use solvers::Scheme;
pub use system::{CoupledFieldIntegrator, Snapshot, SolveState};
pub use traits::ScalarFn;
