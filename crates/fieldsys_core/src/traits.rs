use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the steppers.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A scalar function of one real argument.
///
/// Boundary functions take time, forcing functions take position. Any
/// `Fn(f64) -> f64` closure is a `ScalarFn`, as is a compiled
/// [`ExpressionFn`](crate::expression::ExpressionFn).
pub trait ScalarFn {
    fn eval(&self, x: f64) -> f64;
}

impl<F: Fn(f64) -> f64> ScalarFn for F {
    fn eval(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Right-hand side of a first-order system `dy/dt = f(t, y)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
