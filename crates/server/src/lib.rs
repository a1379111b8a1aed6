//! Library surface of the warden server: configuration loading and the
//! private admin API. The binary in `main.rs` wires these together with the
//! gateway and the reconciler.

pub mod api;
pub mod config;
