//! Per-axis servo control core (units, DSP, PID, `ServoController`) plus the
//! ambient stack that turns it into a runnable service: configuration,
//! errors, the actuator contracts, the axis registry, the per-axis tick
//! task, persisted state, and the HTTP/websocket control surface. `main.rs`
//! is a thin binary wrapper around this library; integration tests under
//! `tests/` exercise it through this public surface.

pub mod actuator;
pub mod config;
pub mod dsp;
pub mod errors;
pub mod http;
pub mod pid;
pub mod registry;
pub mod servo;
pub mod state_store;
pub mod tick;
pub mod units;
