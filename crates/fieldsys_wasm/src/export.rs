//! Snapshot export to JS.

use crate::system::WasmFieldSystem;
use js_sys::Float64Array;
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

/// One field's history in column form, ready for plotting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FieldSeries {
    pub field: usize,
    pub times: Vec<f64>,
    pub profiles: Vec<Vec<f64>>,
}

impl WasmFieldSystem {
    pub(crate) fn series(&self, field: usize) -> anyhow::Result<FieldSeries> {
        let (times, profiles) = self.inner.field_series(field)?;
        Ok(FieldSeries {
            field,
            times,
            profiles,
        })
    }

    pub(crate) fn profile(&self, index: usize, field: usize) -> Option<&[f64]> {
        self.inner
            .solution_data()
            .get(index)
            .and_then(|snap| snap.profile(field))
    }
}

#[wasm_bindgen]
impl WasmFieldSystem {
    pub fn grid_positions(&self) -> Float64Array {
        Float64Array::from(self.inner.grid().positions())
    }

    pub fn snapshot_profile(&self, index: usize, field: usize) -> Result<Float64Array, JsValue> {
        self.profile(index, field)
            .map(Float64Array::from)
            .ok_or_else(|| {
                JsValue::from_str(&format!("No profile for snapshot {index}, field {field}."))
            })
    }

    /// Every snapshot as `{ time, profiles }`.
    pub fn solution_data(&self) -> Result<JsValue, JsValue> {
        to_value(self.inner.solution_data())
            .map_err(|err| JsValue::from_str(&format!("Failed to serialize snapshots: {err}")))
    }

    /// One field's history as `{ field, times, profiles }`.
    pub fn field_series(&self, field: usize) -> Result<JsValue, JsValue> {
        let series = self
            .series(field)
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        to_value(&series)
            .map_err(|err| JsValue::from_str(&format!("Failed to serialize series: {err}")))
    }
}
