//! Reading and writing the files exchanged with the engine.
//!
//! The engine reads a single program file and writes a log plus a set of tabular
//! trajectory files into its working directory. This module renders the program,
//! parses the outputs it understands and manages the scratch directories runs live in.

pub mod input;
pub mod matrix;
pub mod res_log;
pub mod traits;
pub mod trajectory;
pub mod workspace;
