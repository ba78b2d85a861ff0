//! `wasm-bindgen` bridge for `fieldsys_core`.
//!
//! Boundary and forcing functions cross the boundary as expression strings
//! and are compiled on the Rust side; snapshots come back as typed arrays or
//! serialized objects.

pub mod export;
pub mod system;

pub use system::WasmFieldSystem;
