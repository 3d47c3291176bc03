use super::config::ConfigError;
use crate::core::io::matrix::MatrixParseError;
use crate::core::io::trajectory::TableError;
use crate::core::models::bunch::BunchError;
use crate::core::models::line::LineError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Engine failures that have a known cause and remedy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RunFailure {
    #[error("check that fortran runtime libraries are installed")]
    MissingRuntimeLibraries,
    #[error("check that you have sufficient RAM or enable memory overcommit")]
    OutOfMemory,
    #[error("fortran runtime error")]
    RuntimeFault,
    #[error("fatal condition reported in zgoubi.res")]
    FatalLogLine,
}

#[derive(Debug, Error)]
pub enum ZgoubiError {
    #[error("Bad line: {0}")]
    BadLine(String),

    #[error("Zgoubi run failed ({kind}): {detail}")]
    Run { kind: RunFailure, detail: String },

    #[error("Output file '{file}' not found in run directory '{dir}'", dir = dir.display())]
    MissingFile { file: &'static str, dir: PathBuf },

    #[error("Unsupported file format: {0}")]
    OldFormat(String),

    #[error("Cannot track an empty bunch")]
    EmptyBunch,

    #[error("Tracking task starting at particle {start_index} failed: {source}")]
    Worker {
        start_index: usize,
        #[source]
        source: Box<ZgoubiError>,
    },

    #[error("I/O error while trying to {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Line error: {0}")]
    Line(#[from] LineError),

    #[error("Bunch error: {0}")]
    Bunch(#[from] BunchError),

    #[error("Trajectory table error: {0}")]
    Table(#[from] TableError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl ZgoubiError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> ZgoubiError {
        let context = context.into();
        move |source| ZgoubiError::Io { context, source }
    }
}

impl From<MatrixParseError> for ZgoubiError {
    fn from(err: MatrixParseError) -> Self {
        match err {
            MatrixParseError::NoMatrixBlock => ZgoubiError::BadLine(err.to_string()),
            MatrixParseError::Io(source) => ZgoubiError::Io {
                context: "read the MATRIX output".to_string(),
                source,
            },
        }
    }
}
