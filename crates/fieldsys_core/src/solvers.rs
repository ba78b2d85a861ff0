use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};

fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Forward Euler: y_next = y + dt * f(t, y).
pub struct Euler<T: Scalar> {
    k1: Vec<T>,
}

impl<T: Scalar> Euler<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Euler<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        system.apply(t0, state, &mut self.k1);
        for i in 0..state.len() {
            state[i] = state[i] + dt * self.k1[i];
        }
        *t = t0 + dt;
    }
}

/// Coefficients of an explicit Runge-Kutta method: stage nodes `c`, the
/// strictly lower-triangular stage matrix `a` (row `s` has `s` entries) and
/// the final weights `b`.
pub struct Tableau {
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

pub const MIDPOINT: Tableau = Tableau {
    c: &[0.0, 0.5],
    a: &[&[], &[0.5]],
    b: &[0.0, 1.0],
};

pub const CLASSIC_RK4: Tableau = Tableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Explicit Runge-Kutta stepper driven by a [`Tableau`].
///
/// Stage `s` evaluates `f(t + c_s dt, y + dt * sum_j a_sj k_j)` and the step
/// ends at `y + dt * sum_s b_s k_s`.
pub struct RungeKutta<T: Scalar> {
    c: Vec<T>,
    a: Vec<Vec<T>>,
    b: Vec<T>,
    k: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> RungeKutta<T> {
    pub fn new(tableau: &Tableau, dim: usize) -> Self {
        let convert = |row: &[f64]| row.iter().map(|&v| constant::<T>(v)).collect::<Vec<T>>();
        Self {
            c: convert(tableau.c),
            a: tableau.a.iter().map(|row| convert(row)).collect(),
            b: convert(tableau.b),
            k: vec![vec![T::zero(); dim]; tableau.c.len()],
            tmp: vec![T::zero(); dim],
        }
    }

    pub fn midpoint(dim: usize) -> Self {
        Self::new(&MIDPOINT, dim)
    }

    pub fn rk4(dim: usize) -> Self {
        Self::new(&CLASSIC_RK4, dim)
    }

    pub fn stages(&self) -> usize {
        self.k.len()
    }
}

impl<T: Scalar> Steppable<T> for RungeKutta<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        for s in 0..self.k.len() {
            for i in 0..state.len() {
                let slope = self.a[s]
                    .iter()
                    .zip(&self.k)
                    .fold(T::zero(), |acc, (&a, k)| acc + a * k[i]);
                self.tmp[i] = state[i] + dt * slope;
            }
            system.apply(t0 + self.c[s] * dt, &self.tmp, &mut self.k[s]);
        }

        for i in 0..state.len() {
            let slope = self
                .b
                .iter()
                .zip(&self.k)
                .fold(T::zero(), |acc, (&b, k)| acc + b * k[i]);
            state[i] = state[i] + dt * slope;
        }
        *t = t0 + dt;
    }
}

/// Explicit scheme used by the integrator.
///
/// Intermediate stages of `Midpoint` and `Rk4` read edge samples from the
/// boundary functions at the stage time, so time-varying boundaries keep
/// the scheme's order when they drive the interior through diffusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Forward Euler, one right-hand side evaluation per step.
    #[default]
    Euler,
    /// Explicit midpoint, second order.
    Midpoint,
    /// Classic fourth-order Runge-Kutta.
    Rk4,
}

impl Scheme {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "euler" => Some(Scheme::Euler),
            "midpoint" => Some(Scheme::Midpoint),
            "rk4" => Some(Scheme::Rk4),
            _ => None,
        }
    }

    pub(crate) fn build<T: Scalar>(self, dim: usize) -> Stepper<T> {
        match self {
            Scheme::Euler => Stepper::Euler(Euler::new(dim)),
            Scheme::Midpoint => Stepper::RungeKutta(RungeKutta::midpoint(dim)),
            Scheme::Rk4 => Stepper::RungeKutta(RungeKutta::rk4(dim)),
        }
    }
}

pub(crate) enum Stepper<T: Scalar> {
    Euler(Euler<T>),
    RungeKutta(RungeKutta<T>),
}

impl<T: Scalar> Stepper<T> {
    pub(crate) fn step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: &mut T,
        state: &mut [T],
        dt: T,
    ) {
        match self {
            Stepper::Euler(s) => s.step(system, t, state, dt),
            Stepper::RungeKutta(s) => s.step(system, t, state, dt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * x[0];
        }
    }

    struct Clock;

    impl DynamicalSystem<f64> for Clock {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = 2.0 * t;
        }
    }

    fn integrate(scheme: Scheme, system: &impl DynamicalSystem<f64>, steps: usize, dt: f64) -> f64 {
        let mut stepper = scheme.build::<f64>(system.dimension());
        let mut t = 0.0;
        let mut state = vec![1.0];
        for _ in 0..steps {
            stepper.step(system, &mut t, &mut state, dt);
        }
        assert_relative_eq!(t, steps as f64 * dt, epsilon = 1e-12);
        state[0]
    }

    #[test]
    fn euler_single_step_matches_formula() {
        let value = integrate(Scheme::Euler, &Decay { rate: 2.0 }, 1, 0.1);
        assert_relative_eq!(value, 0.8, epsilon = 1e-15);
    }

    #[test]
    fn midpoint_single_step_matches_formula() {
        // 1 - h*r + (h*r)^2 / 2
        let value = integrate(Scheme::Midpoint, &Decay { rate: 2.0 }, 1, 0.1);
        assert_relative_eq!(value, 0.82, epsilon = 1e-15);
    }

    #[test]
    fn higher_order_schemes_are_more_accurate() {
        let exact = (-1.0f64).exp();
        let euler = integrate(Scheme::Euler, &Decay { rate: 1.0 }, 20, 0.05);
        let midpoint = integrate(Scheme::Midpoint, &Decay { rate: 1.0 }, 20, 0.05);
        let rk4 = integrate(Scheme::Rk4, &Decay { rate: 1.0 }, 20, 0.05);

        assert!((midpoint - exact).abs() < (euler - exact).abs());
        assert!((rk4 - exact).abs() < (midpoint - exact).abs());
        assert_relative_eq!(rk4, exact, epsilon = 1e-7);
    }

    #[test]
    fn midpoint_is_exact_for_time_linear_rhs() {
        // y' = 2t, y(0) = 1 => y(t) = 1 + t^2
        let value = integrate(Scheme::Midpoint, &Clock, 10, 0.1);
        assert_relative_eq!(value, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn tableaus_are_consistent() {
        for tableau in [&MIDPOINT, &CLASSIC_RK4] {
            assert_eq!(tableau.a.len(), tableau.c.len());
            assert_eq!(tableau.b.len(), tableau.c.len());
            assert_relative_eq!(tableau.b.iter().sum::<f64>(), 1.0, epsilon = 1e-15);
            for (s, row) in tableau.a.iter().enumerate() {
                assert_eq!(row.len(), s);
                assert_relative_eq!(row.iter().sum::<f64>(), tableau.c[s], epsilon = 1e-15);
            }
        }
        assert_eq!(RungeKutta::<f64>::midpoint(3).stages(), 2);
        assert_eq!(RungeKutta::<f64>::rk4(3).stages(), 4);
    }

    #[test]
    fn rk4_single_step_matches_taylor_polynomial() {
        // y' = -y over one step reproduces 1 - h + h^2/2 - h^3/6 + h^4/24.
        let h = 0.1f64;
        let value = integrate(Scheme::Rk4, &Decay { rate: 1.0 }, 1, h);
        let taylor = 1.0 - h + h.powi(2) / 2.0 - h.powi(3) / 6.0 + h.powi(4) / 24.0;
        assert_relative_eq!(value, taylor, epsilon = 1e-15);
    }

    #[test]
    fn scheme_names_round_trip() {
        assert_eq!(Scheme::from_name("euler"), Some(Scheme::Euler));
        assert_eq!(Scheme::from_name("midpoint"), Some(Scheme::Midpoint));
        assert_eq!(Scheme::from_name("rk4"), Some(Scheme::Rk4));
        assert_eq!(Scheme::from_name("tsit5"), None);
        assert_eq!(Scheme::default(), Scheme::Euler);
    }
}
