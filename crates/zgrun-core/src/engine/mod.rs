//! # Engine Module
//!
//! Stateful execution of the external engine: configuring runs, driving one engine
//! process per run and exposing what it left behind.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Executable location, scratch root and scheduler
//!   tuning, built through [`config::EngineConfigBuilder`]
//! - **Execution** ([`executor`]) - The single-run protocol: stage a run directory,
//!   spawn the engine, classify its exit and scan its log
//! - **Results** ([`results`]) - The store owning a run directory, with readers for
//!   every output file and the optics analyses
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - [`error::ZgoubiError`], the library-wide error

pub mod config;
pub mod error;
pub mod executor;
pub mod progress;
pub mod results;

#[cfg(all(test, unix))]
pub(crate) mod test_support;
