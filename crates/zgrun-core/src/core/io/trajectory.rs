//! Reader for the engine's text trajectory tables (`zgoubi.fai`, `zgoubi.plt`, ...).
//!
//! A table starts with `#` header lines, one of which lists the comma-separated column
//! names. Data rows are whitespace separated; text fields such as element labels are
//! single-quoted and keep their fixed-width padding, which is significant when
//! matching labels.

use super::traits::EngineOutput;
use crate::core::models::bunch::{Bunch, Particle};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Trajectory file has no data rows")]
    Empty,
    #[error("Unsupported trajectory file format: {0}")]
    OldFormat(String),
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Column '{0}' not found in trajectory table")]
    MissingColumn(String),
    #[error("Column '{column}' holds a non-numeric value in row {row}")]
    NotNumeric { column: String, row: usize },
}

/// Column names, each with the alternative spellings used across engine versions.
pub mod columns {
    pub const LOSS_CODE: &[&str] = &["KEX", "IEX"];
    pub const PASS: &[&str] = &["IPASS", "PASS"];
    pub const LABEL1: &[&str] = &["LABEL1", "element_label1"];
    pub const LABEL2: &[&str] = &["LABEL2", "element_label2"];
    pub const D_MINUS_1: &[&str] = &["D-1"];
    pub const Y: &[&str] = &["Y"];
    pub const T: &[&str] = &["T"];
    pub const Z: &[&str] = &["Z"];
    pub const P: &[&str] = &["P"];
    pub const S: &[&str] = &["S"];
    pub const RIGIDITY: &[&str] = &["BORO"];

    pub(super) const GROUPS: &[&[&str]] = &[LOSS_CODE, PASS, LABEL1, LABEL2];
}

/// One parsed field of a data row.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Field {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Int(value) => Some(*value as f64),
            Field::Float(value) => Some(*value),
            Field::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::Int(value) => Some(*value),
            Field::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Parses a number that may use a Fortran `D` exponent.
pub(crate) fn parse_fortran_float(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().or_else(|| {
        token
            .replace(['D', 'd'], "E")
            .parse::<f64>()
            .ok()
    })
}

fn parse_bare(token: &str) -> Field {
    if let Ok(value) = token.parse::<i64>() {
        return Field::Int(value);
    }
    match parse_fortran_float(token) {
        Some(value) => Field::Float(value),
        None => Field::Text(token.to_string()),
    }
}

fn tokenize(line: &str) -> Result<Vec<Field>, String> {
    let mut fields = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' {
            chars.next();
            let close = chars.by_ref().find(|&(_, ch)| ch == '\'');
            let Some((end, _)) = close else {
                return Err(format!(
                    "unterminated quoted field starting at column {}",
                    start + 1
                ));
            };
            fields.push(Field::Text(line[start + 1..end].to_string()));
        } else {
            let mut end = line.len();
            while let Some(&(index, ch)) = chars.peek() {
                if ch.is_whitespace() {
                    end = index;
                    break;
                }
                chars.next();
            }
            fields.push(parse_bare(&line[start..end]));
        }
    }
    Ok(fields)
}

fn parse_column_header(header: &str) -> Option<Vec<String>> {
    let names: Vec<String> = header
        .split(',')
        .map(|name| name.trim().to_string())
        .collect();
    let has_loss_code = names
        .iter()
        .any(|name| columns::LOSS_CODE.contains(&name.as_str()));
    (names.len() > 1 && has_loss_code).then_some(names)
}

/// A parsed trajectory table: named columns over rows of typed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<Field>>,
}

impl TrajectoryTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Field>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finds a column by name, accepting the alternative spellings of known columns.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        if let Some(index) = self.columns.iter().position(|column| column == name) {
            return Some(index);
        }
        let group = columns::GROUPS.iter().find(|group| group.contains(&name))?;
        self.columns
            .iter()
            .position(|column| group.contains(&column.as_str()))
    }

    /// Like [`TrajectoryTable::column_index`] for a list of alternative names.
    pub fn find_column(&self, names: &[&str]) -> Result<usize, TableError> {
        names
            .iter()
            .find_map(|name| self.column_index(name))
            .ok_or_else(|| TableError::MissingColumn(names.join("/")))
    }

    fn number(&self, row: usize, column: usize) -> Result<f64, TableError> {
        self.rows[row][column]
            .as_f64()
            .ok_or_else(|| TableError::NotNumeric {
                column: self.columns[column].clone(),
                row,
            })
    }

    /// All values of a numeric column.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, TableError> {
        let column = self.find_column(&[name])?;
        (0..self.rows.len())
            .map(|row| self.number(row, column))
            .collect()
    }

    /// Width of the fixed-width label fields, if the table has labels.
    pub fn label_width(&self) -> Option<usize> {
        let column = self.column_index(columns::LABEL1[0])?;
        self.rows
            .first()
            .and_then(|row| row[column].as_str())
            .map(|label| label.chars().count())
    }

    fn loss_codes(&self) -> Result<Vec<LossCode>, TableError> {
        let column = self.find_column(columns::LOSS_CODE)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row, fields)| {
                fields[column]
                    .as_i64()
                    .map(LossCode::from_code)
                    .ok_or_else(|| TableError::NotNumeric {
                        column: self.columns[column].clone(),
                        row,
                    })
            })
            .collect()
    }
}

impl EngineOutput for TrajectoryTable {
    type Error = TableError;

    fn read_from(reader: &mut impl BufRead) -> Result<Self, TableError> {
        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix('#') {
                if columns.is_none() {
                    columns = parse_column_header(header);
                }
                continue;
            }
            let Some(names) = &columns else {
                return Err(TableError::OldFormat(
                    "no column-name header before the first data row".to_string(),
                ));
            };
            let fields = tokenize(trimmed).map_err(|message| TableError::Parse {
                line: line_number,
                message,
            })?;
            if fields.len() != names.len() {
                return Err(TableError::Parse {
                    line: line_number,
                    message: format!("expected {} fields, found {}", names.len(), fields.len()),
                });
            }
            rows.push(fields);
        }

        match columns {
            Some(columns) if !rows.is_empty() => Ok(Self { columns, rows }),
            _ => Err(TableError::Empty),
        }
    }
}

/// Per-particle status recorded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossCode {
    Surviving,
    OutsideFieldMap,
    TooManySteps,
    DeviationOverHalfPi,
    StoppedByWalls,
    TooManyDeplaIterations,
    EnergyLossExceedsEnergy,
    FieldDiscontinuity,
    FieldLimit,
    Unknown(i64),
}

impl LossCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => LossCode::Surviving,
            -1 => LossCode::OutsideFieldMap,
            -2 => LossCode::TooManySteps,
            -3 => LossCode::DeviationOverHalfPi,
            -4 => LossCode::StoppedByWalls,
            -5 => LossCode::TooManyDeplaIterations,
            -6 => LossCode::EnergyLossExceedsEnergy,
            -7 => LossCode::FieldDiscontinuity,
            -8 => LossCode::FieldLimit,
            other => LossCode::Unknown(other),
        }
    }

    pub fn is_surviving(self) -> bool {
        self == LossCode::Surviving
    }

    pub fn description(self) -> &'static str {
        match self {
            LossCode::Surviving => "surviving",
            LossCode::OutsideFieldMap => {
                "the trajectory happened to wander outside the limits of a field map"
            }
            LossCode::TooManySteps => "too many integration steps in an optical element",
            LossCode::DeviationOverHalfPi => {
                "deviation happened to exceed pi/2 in an optical element"
            }
            LossCode::StoppedByWalls => "stopped by walls (procedures CHAMBR, COLLIMA)",
            LossCode::TooManyDeplaIterations => "too many iterations in subroutine DEPLA",
            LossCode::EnergyLossExceedsEnergy => "energy loss exceeds particle energy",
            LossCode::FieldDiscontinuity => {
                "field discontinuities larger than 50% within a field map"
            }
            LossCode::FieldLimit => "reached field limit in an optical element",
            LossCode::Unknown(_) => "unknown loss code",
        }
    }
}

/// Count of lost rows per loss cause.
pub type LossSummary = BTreeMap<&'static str, usize>;

/// Counts lost rows by cause, or `None` when every row survived.
pub fn loss_summary(table: &TrajectoryTable) -> Result<Option<LossSummary>, TableError> {
    let codes = table.loss_codes()?;
    if codes.iter().all(|code| code.is_surviving()) {
        return Ok(None);
    }
    let mut summary = LossSummary::new();
    for code in codes.into_iter().filter(|code| !code.is_surviving()) {
        *summary.entry(code.description()).or_insert(0) += 1;
    }
    Ok(Some(summary))
}

/// Which rows of a trajectory table make up the tracked bunch.
#[derive(Debug, Clone, Copy)]
pub struct BunchSelection<'a> {
    /// Label of the marker the bunch was recorded at; every row is used when `None`.
    pub end_label: Option<&'a str>,
    /// Label field width to pad `end_label` to when the table has no labels to measure.
    pub label_width: usize,
    pub drop_lost: bool,
}

/// Builds a bunch from the rows recorded at the end of tracking.
///
/// Rows are narrowed to survivors (if requested), to the highest pass number and to
/// the end label. Coordinates are converted from engine units (cm, mrad, kG·cm) to SI.
/// The species and, for an empty result, the rigidity come from `template`.
pub fn extract_bunch(
    table: &TrajectoryTable,
    selection: &BunchSelection<'_>,
    template: Option<&Bunch>,
) -> Result<Bunch, TableError> {
    if let Some(summary) = loss_summary(table)? {
        for (cause, count) in summary {
            warn!(count, cause, "Particles lost");
        }
    }

    let codes = table.loss_codes()?;
    let mut kept: Vec<usize> = (0..table.len())
        .filter(|&row| !selection.drop_lost || codes[row].is_surviving())
        .collect();

    if let Ok(pass_column) = table.find_column(columns::PASS) {
        let passes = kept
            .iter()
            .map(|&row| table.number(row, pass_column))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(last_pass) = passes.iter().copied().reduce(f64::max) {
            kept = kept
                .into_iter()
                .zip(passes)
                .filter(|&(_, pass)| pass == last_pass)
                .map(|(row, _)| row)
                .collect();
        }
    }

    if let Some(label) = selection.end_label {
        let column = table.find_column(columns::LABEL1)?;
        let width = table.label_width().unwrap_or(selection.label_width);
        let padded = format!("{:<width$}", label, width = width);
        kept.retain(|&row| table.rows[row][column].as_str() == Some(padded.as_str()));
    }

    let (mass, charge, template_rigidity) =
        template.map_or((0.0, 0.0, 0.0), |b| (b.mass(), b.charge(), b.rigidity()));
    if kept.is_empty() {
        return Ok(Bunch::from_particles(Vec::new(), template_rigidity, mass, charge));
    }

    let d = table.find_column(columns::D_MINUS_1)?;
    let y = table.find_column(columns::Y)?;
    let t = table.find_column(columns::T)?;
    let z = table.find_column(columns::Z)?;
    let p = table.find_column(columns::P)?;
    let s = table.find_column(columns::S)?;
    let boro = table.find_column(columns::RIGIDITY)?;

    let particles = kept
        .iter()
        .map(|&row| {
            Ok(Particle {
                d: table.number(row, d)? + 1.0,
                y: table.number(row, y)? / 100.0,
                t: table.number(row, t)? / 1000.0,
                z: table.number(row, z)? / 100.0,
                p: table.number(row, p)? / 1000.0,
                s: table.number(row, s)? / 100.0,
                ..Particle::default()
            })
        })
        .collect::<Result<Vec<_>, TableError>>()?;
    let rigidity = table.number(kept[0], boro)? / 1000.0;

    Ok(Bunch::from_particles(particles, rigidity, mass, charge))
}
