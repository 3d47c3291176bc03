//! # Core Module
//!
//! Models and file formats shared by every run, independent of how the engine is
//! invoked.
//!
//! ## Architecture
//!
//! - **Beamline Representation** ([`models`]) - Elements, nested lines, particle bunches
//!   and structural checks on lines
//! - **File I/O** ([`io`]) - Engine input rendering, trajectory tables, log scanning,
//!   matrix extraction and run directories
//! - **Utilities** ([`utils`]) - Relativistic energy and rigidity conversions

pub mod io;
pub mod models;
pub mod utils;
