//! # Workflows Module
//!
//! Complete procedures built on the engine layer.
//!
//! - **Bunch Tracking** ([`track`]) - Tracks a particle bunch through a line, either in
//!   one engine run or spread over a pool of worker threads, and reassembles the
//!   surviving particles in their original order.

pub mod track;
