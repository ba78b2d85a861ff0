//! Core WASM system wrapper.

use anyhow::{bail, Context};
use fieldsys_core::{
    CoupledFieldIntegrator, FieldSystemSpec, IntegratorSettings, Scheme, SolveState,
};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmFieldSystem {
    pub(crate) inner: CoupledFieldIntegrator,
}

/// Assembles a [`FieldSystemSpec`] from the flat arguments a JS caller passes.
pub(crate) fn build_spec(
    boundary_exprs: Vec<String>,
    time_step: f64,
    total_time: f64,
    grid_size: usize,
    coupling: &[f64],
    forcing_expr: String,
    scheme_name: &str,
    diffusivity: f64,
) -> anyhow::Result<FieldSystemSpec> {
    let n = boundary_exprs.len();
    if n == 0 {
        bail!("At least one boundary expression is required.");
    }
    if coupling.len() != n * n {
        bail!(
            "Coupling must hold {} values ({n}x{n} row-major), got {}.",
            n * n,
            coupling.len()
        );
    }
    let scheme = match Scheme::from_name(scheme_name) {
        Some(scheme) => scheme,
        None => bail!("Unknown scheme '{scheme_name}'"),
    };

    Ok(FieldSystemSpec {
        boundaries: boundary_exprs,
        coupling: coupling.chunks(n).map(<[f64]>::to_vec).collect(),
        forcing: forcing_expr,
        settings: IntegratorSettings::new(time_step, total_time, grid_size)
            .with_scheme(scheme)
            .with_diffusivity(diffusivity),
    })
}

pub(crate) fn build_integrator(spec: &FieldSystemSpec) -> anyhow::Result<CoupledFieldIntegrator> {
    CoupledFieldIntegrator::from_spec(spec).context("Failed to configure field system")
}

fn to_js(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

#[wasm_bindgen]
impl WasmFieldSystem {
    /// Forcing mode stays `Initial`; use [`from_spec`](Self::from_spec) for the others.
    #[wasm_bindgen(constructor)]
    pub fn new(
        boundary_exprs: Vec<String>,
        time_step: f64,
        total_time: f64,
        grid_size: usize,
        coupling: Vec<f64>,
        forcing_expr: String,
        scheme_name: &str,
        diffusivity: f64,
    ) -> Result<WasmFieldSystem, JsValue> {
        console_error_panic_hook::set_once();

        let spec = build_spec(
            boundary_exprs,
            time_step,
            total_time,
            grid_size,
            &coupling,
            forcing_expr,
            scheme_name,
            diffusivity,
        )
        .map_err(to_js)?;
        let inner = build_integrator(&spec).map_err(to_js)?;
        Ok(WasmFieldSystem { inner })
    }

    /// Builds from a serialized `FieldSystemSpec` object.
    pub fn from_spec(spec: JsValue) -> Result<WasmFieldSystem, JsValue> {
        console_error_panic_hook::set_once();

        let spec: FieldSystemSpec = serde_wasm_bindgen::from_value(spec)
            .map_err(|err| JsValue::from_str(&format!("Invalid system spec: {err}")))?;
        let inner = build_integrator(&spec).map_err(to_js)?;
        Ok(WasmFieldSystem { inner })
    }

    pub fn solve(&mut self, frame_count: usize) -> Result<(), JsValue> {
        self.inner
            .solve(frame_count)
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    pub fn is_solved(&self) -> bool {
        self.inner.state() == SolveState::Solved
    }

    pub fn field_count(&self) -> usize {
        self.inner.field_count()
    }

    pub fn grid_size(&self) -> usize {
        self.inner.grid().len()
    }

    pub fn step_count(&self) -> usize {
        self.inner.step_count()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.solution_data().len()
    }

    pub fn snapshot_time(&self, index: usize) -> Option<f64> {
        self.inner.solution_data().get(index).map(|snap| snap.time)
    }

    /// Times of all snapshots, in capture order.
    pub fn snapshot_times(&self) -> Vec<f64> {
        self.inner.solution_data().iter().map(|snap| snap.time).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_spec(scheme: &str) -> anyhow::Result<FieldSystemSpec> {
        build_spec(
            vec!["t".to_string(), "t + 10".to_string()],
            0.1,
            1.0,
            100,
            &[0.0, 0.1, 0.1, 0.0],
            "5 * (abs(x) < 5)".to_string(),
            scheme,
            0.0,
        )
    }

    #[test]
    fn build_spec_splits_coupling_rows() {
        let spec = reference_spec("midpoint").expect("spec");
        assert_eq!(spec.coupling, vec![vec![0.0, 0.1], vec![0.1, 0.0]]);
        assert_eq!(spec.settings.scheme, Scheme::Midpoint);
        assert_eq!(spec.settings.grid_size, 100);
    }

    #[test]
    fn build_spec_rejects_bad_arguments() {
        let err = build_spec(Vec::new(), 0.1, 1.0, 10, &[], "x".to_string(), "euler", 0.0)
            .unwrap_err();
        assert!(err.to_string().contains("boundary"));

        let err = build_spec(
            vec!["t".to_string(), "t".to_string()],
            0.1,
            1.0,
            10,
            &[0.0; 3],
            "x".to_string(),
            "euler",
            0.0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Coupling must hold 4 values"));

        assert!(reference_spec("tsit5").is_err());
    }

    #[test]
    fn build_integrator_reports_context() {
        let mut spec = reference_spec("euler").expect("spec");
        spec.forcing = "5 * (abs(y) < 5)".to_string();
        let err = build_integrator(&spec).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("Failed to configure field system"));
        assert!(message.contains("forcing"));
    }

    #[test]
    fn wasm_field_system_solves_reference_scenario() {
        let mut system = WasmFieldSystem::new(
            vec!["t".to_string(), "t + 10".to_string()],
            0.1,
            1.0,
            100,
            vec![0.0, 0.1, 0.1, 0.0],
            "5 * (abs(x) < 5)".to_string(),
            "euler",
            0.0,
        )
        .expect("system should build");

        assert_eq!(system.field_count(), 2);
        assert_eq!(system.grid_size(), 100);
        assert_eq!(system.step_count(), 10);
        assert_eq!(system.snapshot_count(), 0);
        assert!(!system.is_solved());

        system.solve(100).expect("solve");
        assert!(system.is_solved());
        assert_eq!(system.snapshot_count(), 100);
        assert_eq!(system.snapshot_time(0), Some(0.0));
        assert_eq!(system.snapshot_time(99), Some(1.0));
        assert_eq!(system.snapshot_time(100), None);
        assert_eq!(system.snapshot_times().len(), 100);
    }

    #[test]
    fn diffusivity_argument_mixes_interiors() {
        let mut system = WasmFieldSystem::new(
            vec!["t".to_string(), "t + 10".to_string()],
            0.1,
            1.0,
            100,
            vec![0.0, 0.1, 0.1, 0.0],
            "5 * (abs(x) < 5)".to_string(),
            "midpoint",
            1.0,
        )
        .expect("system should build");
        assert_eq!(system.inner.settings().diffusivity, 1.0);
        system.solve(11).expect("solve");

        let last = &system.inner.solution_data()[10];
        assert!(last.profiles[1][1] > last.profiles[0][1]);
        assert!(last.profiles[0][1] > 0.0);
    }

    #[test]
    #[cfg(target_arch = "wasm32")]
    fn wasm_field_system_rejects_second_solve() {
        let mut system = WasmFieldSystem::new(
            vec!["t".to_string()],
            0.5,
            1.0,
            4,
            vec![0.0],
            "0".to_string(),
            "rk4",
            0.0,
        )
        .expect("system should build");
        system.solve(3).expect("first solve");
        assert!(system.solve(3).is_err(), "expected reentrant solve error");
    }

    #[test]
    #[cfg(target_arch = "wasm32")]
    fn wasm_field_system_rejects_unknown_scheme() {
        let result = WasmFieldSystem::new(
            vec!["t".to_string()],
            0.5,
            1.0,
            4,
            vec![0.0],
            "0".to_string(),
            "nope",
            0.0,
        );
        assert!(result.is_err(), "expected unknown scheme error");
    }
}
