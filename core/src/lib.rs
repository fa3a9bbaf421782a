#![deny(missing_docs)]
//! pulse_core: shared building blocks (config, health log store, tracing, probe and job types).

/// Configuration helpers (AppId, dirs, load_or_init, validation, env overrides).
pub mod cfg;
/// Rotating structured health log (append, rotate, read-back).
pub mod logfile;
/// Tracing/log initialization helpers.
pub mod logx;
/// Shared job model used by the scheduler, the control plane and tools.
pub mod job;
/// Probe outcome types and verdict classification.
pub mod probe;
