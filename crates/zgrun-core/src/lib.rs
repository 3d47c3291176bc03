//! # zgrun
//!
//! Run orchestration and result extraction for the Zgoubi particle-tracking code.
//! The engine itself is an external executable; this library builds its input,
//! runs it in scratch directories and reads its output back into typed data.
//!
//! ## Architecture
//!
//! - **[`core`]: Models and formats.** Beamline elements and nested lines, particle
//!   bunches, the engine input renderer and parsers for trajectory tables, logs and
//!   MATRIX output.
//!
//! - **[`engine`]: Execution.** Configuration, the single-run executor and the result
//!   store that owns a run's directory.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built on the two layers
//!   below, such as tracking a bunch through a line on several threads.

pub mod core;
pub mod engine;
pub mod workflows;
