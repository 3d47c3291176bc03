use super::error::ZgoubiError;
use crate::core::io::matrix::{MatrixOutput, TwissParameters};
use crate::core::io::res_log;
use crate::core::io::traits::EngineOutput;
use crate::core::io::trajectory::{self, BunchSelection, LossSummary, TableError, TrajectoryTable};
use crate::core::io::workspace::RunDirectory;
use crate::core::models::bunch::Bunch;
use nalgebra::Matrix6;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The files an engine run may leave in its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFile {
    Res,
    Plt,
    Dat,
    Fai,
    Spn,
    BinaryFai,
    BinaryPlt,
    ImpDev,
    Optics,
}

impl OutputFile {
    pub const ALL: [OutputFile; 9] = [
        OutputFile::Res,
        OutputFile::Plt,
        OutputFile::Dat,
        OutputFile::Fai,
        OutputFile::Spn,
        OutputFile::BinaryFai,
        OutputFile::BinaryPlt,
        OutputFile::ImpDev,
        OutputFile::Optics,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            OutputFile::Res => "zgoubi.res",
            OutputFile::Plt => "zgoubi.plt",
            OutputFile::Dat => "zgoubi.dat",
            OutputFile::Fai => "zgoubi.fai",
            OutputFile::Spn => "zgoubi.spn",
            OutputFile::BinaryFai => "b_zgoubi.fai",
            OutputFile::BinaryPlt => "b_zgoubi.plt",
            OutputFile::ImpDev => "zgoubi.impdev.out",
            OutputFile::Optics => "zgoubi.OPTICS.out",
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, OutputFile::BinaryFai | OutputFile::BinaryPlt)
    }
}

/// Wall-clock time spent preparing and running the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTimings {
    pub setup: Duration,
    pub run: Duration,
}

/// The outcome of one engine run: its directory and the element types it contained.
///
/// The run directory lives as long as the store (or until [`Results::clean`]); lines
/// only keep a non-owning record of it.
#[derive(Debug)]
pub struct Results {
    run_dir: Arc<RunDirectory>,
    element_types: Vec<String>,
    label_width: usize,
    timings: Option<RunTimings>,
}

impl Results {
    pub(crate) fn new(
        run_dir: Arc<RunDirectory>,
        element_types: Vec<String>,
        label_width: usize,
    ) -> Self {
        Self {
            run_dir,
            element_types,
            label_width,
            timings: None,
        }
    }

    pub(crate) fn with_timings(mut self, timings: RunTimings) -> Self {
        self.timings = Some(timings);
        self
    }

    pub fn run_dir(&self) -> &Path {
        self.run_dir.path()
    }

    /// Element type names of the line that was run, in line order, without duplicates.
    pub fn element_types(&self) -> &[String] {
        &self.element_types
    }

    pub fn has_element_type(&self, name: &str) -> bool {
        self.element_types.iter().any(|t| t == name)
    }

    pub fn timings(&self) -> Option<RunTimings> {
        self.timings
    }

    /// Path of an output file.
    ///
    /// # Errors
    ///
    /// Returns [`ZgoubiError::MissingFile`] if the run did not produce it.
    pub fn path(&self, file: OutputFile) -> Result<PathBuf, ZgoubiError> {
        let path = self.run_dir.path().join(file.file_name());
        if path.is_file() {
            Ok(path)
        } else {
            Err(ZgoubiError::MissingFile {
                file: file.file_name(),
                dir: self.run_dir.path().to_path_buf(),
            })
        }
    }

    pub fn open(&self, file: OutputFile) -> Result<BufReader<File>, ZgoubiError> {
        let path = self.path(file)?;
        let handle = File::open(&path).map_err(ZgoubiError::io(format!("open {}", path.display())))?;
        Ok(BufReader::new(handle))
    }

    pub fn text(&self, file: OutputFile) -> Result<String, ZgoubiError> {
        let path = self.path(file)?;
        fs::read_to_string(&path).map_err(ZgoubiError::io(format!("read {}", path.display())))
    }

    pub fn bytes(&self, file: OutputFile) -> Result<Vec<u8>, ZgoubiError> {
        let path = self.path(file)?;
        fs::read(&path).map_err(ZgoubiError::io(format!("read {}", path.display())))
    }

    /// The engine log.
    pub fn res(&self) -> Result<String, ZgoubiError> {
        self.text(OutputFile::Res)
    }

    /// Copies an output file to `destination`.
    pub fn save(&self, file: OutputFile, destination: &Path) -> Result<(), ZgoubiError> {
        let path = self.path(file)?;
        fs::copy(&path, destination).map_err(ZgoubiError::io(format!(
            "copy {} to {}",
            path.display(),
            destination.display()
        )))?;
        Ok(())
    }

    /// Parses a text trajectory file.
    ///
    /// # Errors
    ///
    /// Binary trajectory files are reported as [`ZgoubiError::OldFormat`]; they need an
    /// external reader.
    pub fn get_all(&self, file: OutputFile) -> Result<TrajectoryTable, ZgoubiError> {
        if file.is_binary() {
            return Err(ZgoubiError::OldFormat(format!(
                "{} is a binary trajectory file, read it with an external reader",
                file.file_name()
            )));
        }
        let mut reader = self.open(file)?;
        Ok(TrajectoryTable::read_from(&mut reader)?)
    }

    /// Extracts numeric columns row by row, each scaled by the matching multiplier
    /// (1 when none is given).
    pub fn get_track(
        &self,
        file: OutputFile,
        columns: &[&str],
        multipliers: Option<&[f64]>,
    ) -> Result<Vec<Vec<f64>>, ZgoubiError> {
        let table = self.get_all(file)?;
        let values = columns
            .iter()
            .map(|column| table.column_f64(column))
            .collect::<Result<Vec<_>, _>>()?;
        let scale: Vec<f64> = (0..columns.len())
            .map(|i| multipliers.and_then(|m| m.get(i)).copied().unwrap_or(1.0))
            .collect();
        Ok((0..table.len())
            .map(|row| {
                values
                    .iter()
                    .zip(&scale)
                    .map(|(column, factor)| column[row] * factor)
                    .collect()
            })
            .collect())
    }

    /// Counts of lost particles per cause in a trajectory file, `None` if none were lost.
    pub fn loss_summary(&self, file: OutputFile) -> Result<Option<LossSummary>, ZgoubiError> {
        let table = self.get_all(file)?;
        Ok(trajectory::loss_summary(&table)?)
    }

    /// Reads the bunch recorded at `end_label` on the last pass.
    ///
    /// A missing or empty trajectory file means every particle was lost; it yields an
    /// empty bunch with the species of `old_bunch` and a warning rather than an error.
    pub fn get_bunch(
        &self,
        file: OutputFile,
        end_label: Option<&str>,
        old_bunch: Option<&Bunch>,
        drop_lost: bool,
    ) -> Result<Bunch, ZgoubiError> {
        let table = match self.get_all(file) {
            Ok(table) => table,
            Err(ZgoubiError::MissingFile { .. }) | Err(ZgoubiError::Table(TableError::Empty)) => {
                warn!(
                    file = file.file_name(),
                    dir = %self.run_dir().display(),
                    "No particles recorded, returning an empty bunch"
                );
                return Ok(Bunch::empty_like(old_bunch));
            }
            Err(e) => return Err(e),
        };
        let selection = BunchSelection {
            end_label,
            label_width: self.label_width,
            drop_lost,
        };
        Ok(trajectory::extract_bunch(&table, &selection, old_bunch)?)
    }

    fn require_matrix_run(&self) -> Result<(), ZgoubiError> {
        if self.has_element_type("OBJET5") && self.has_element_type("MATRIX") {
            Ok(())
        } else {
            Err(ZgoubiError::BadLine(
                "optics need a line with an OBJET5 and a MATRIX element".to_string(),
            ))
        }
    }

    /// Parses the MATRIX output of the log.
    pub fn parse_matrix(&self) -> Result<MatrixOutput, ZgoubiError> {
        self.require_matrix_run()?;
        let mut reader = self.open(OutputFile::Res)?;
        Ok(MatrixOutput::read_from(&mut reader)?)
    }

    /// Horizontal and vertical tunes; -1 for a plane the engine reports as undefined.
    pub fn get_tune(&self) -> Result<(f64, f64), ZgoubiError> {
        Ok(self.parse_matrix()?.tune)
    }

    pub fn get_transfer_matrix(&self) -> Result<Matrix6<f64>, ZgoubiError> {
        self.parse_matrix()?
            .transfer_matrix
            .ok_or_else(|| ZgoubiError::BadLine("no transfer matrix in MATRIX output".to_string()))
    }

    pub fn get_twiss_parameters(&self) -> Result<TwissParameters, ZgoubiError> {
        self.parse_matrix()?
            .twiss
            .ok_or_else(|| ZgoubiError::BadLine("no beam matrix in MATRIX output".to_string()))
    }

    /// `true` if the REBELOTE loop of the run completed.
    pub fn test_rebelote(&self) -> Result<bool, ZgoubiError> {
        if !self.has_element_type("REBELOTE") {
            return Err(ZgoubiError::BadLine(
                "line has no REBELOTE element".to_string(),
            ));
        }
        let mut reader = self.open(OutputFile::Res)?;
        res_log::rebelote_completed(&mut reader).map_err(ZgoubiError::io("read zgoubi.res"))
    }

    /// `true` if the log ends with one of the engine's completion banners.
    pub fn run_success(&self) -> Result<bool, ZgoubiError> {
        let mut reader = self.open(OutputFile::Res)?;
        res_log::run_completed(&mut reader).map_err(ZgoubiError::io("read zgoubi.res"))
    }

    /// The particle definition section of the log.
    pub fn particle_info(&self) -> Result<String, ZgoubiError> {
        let mut reader = self.open(OutputFile::Res)?;
        res_log::particle_info(&mut reader).map_err(ZgoubiError::io("read zgoubi.res"))
    }

    /// Removes the run directory now. Safe to call repeatedly.
    pub fn clean(&self) {
        self.run_dir.clean();
    }

    /// Detaches the run directory so it stays on disk, returning its path.
    pub fn keep(&self) -> PathBuf {
        self.run_dir.keep()
    }
}
