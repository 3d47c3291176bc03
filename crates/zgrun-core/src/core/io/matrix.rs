//! Extraction of first-order optics from the engine log (`zgoubi.res`).
//!
//! The log is a sequence of blocks, each opened by a line of `*` characters followed
//! by a header naming the element that produced it. Only MATRIX blocks are kept; inside
//! them, the transfer matrix, the periodic beam matrix and the tunes are located by
//! their fixed headings.

use super::trajectory::parse_fortran_float;
use super::traits::EngineOutput;
use nalgebra::Matrix6;
use std::io::{self, BufRead};
use thiserror::Error;
use tracing::{error, warn};

pub const TRANSFER_MATRIX_HEADING: &str = "TRANSFER  MATRIX  ORDRE  1  (MKSA units)";
pub const BEAM_MATRIX_HEADING: &str =
    "Beam  matrix  (beta/-alpha/-alpha/gamma) and  periodic  dispersion  (MKSA units)";
/// Header marker of newer engine versions; the element keyword follows it.
const KEYWORD_LABEL_MARKER: &str = "Keyword, label(s)";
const TUNE_PREFIX: &str = "NU_Y";

#[derive(Debug, Error)]
pub enum MatrixParseError {
    #[error("Could not find MATRIX output in the log; the line may be malformed or the beam lost")]
    NoMatrixBlock,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Periodic optics functions in both transverse planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwissParameters {
    pub beta_y: f64,
    pub alpha_y: f64,
    pub gamma_y: f64,
    pub disp_y: f64,
    pub disp_py: f64,
    pub beta_z: f64,
    pub alpha_z: f64,
    pub gamma_z: f64,
    pub disp_z: f64,
    pub disp_pz: f64,
}

impl TwissParameters {
    fn from_beam_matrix(m: &Matrix6<f64>) -> Self {
        Self {
            beta_y: m[(0, 0)],
            alpha_y: -m[(1, 0)],
            gamma_y: m[(1, 1)],
            disp_y: m[(0, 5)],
            disp_py: m[(1, 5)],
            beta_z: m[(2, 2)],
            alpha_z: -m[(3, 2)],
            gamma_z: m[(3, 3)],
            disp_z: m[(2, 5)],
            disp_pz: m[(3, 5)],
        }
    }
}

/// Everything read from the MATRIX blocks of one log.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixOutput {
    pub transfer_matrix: Option<Matrix6<f64>>,
    pub twiss: Option<TwissParameters>,
    /// Horizontal and vertical tunes; -1 when the engine reports them as undefined.
    pub tune: (f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekingBlock,
    InMatrixBlock,
    InOtherBlock,
}

/// Reads the element keyword from a block header, trying the newer
/// `Keyword, label(s)` layout before the older one.
fn block_keyword(header: &str) -> Option<&str> {
    let position = if header.contains(KEYWORD_LABEL_MARKER) {
        4
    } else {
        1
    };
    header.split_whitespace().nth(position)
}

fn is_block_separator(line: &str) -> bool {
    line.starts_with("******")
}

/// Collects the trimmed lines of every MATRIX block.
fn matrix_block_lines(reader: &mut impl BufRead) -> io::Result<Vec<String>> {
    let mut state = ScanState::SeekingBlock;
    let mut awaiting_header = false;
    let mut lines = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if is_block_separator(&line) {
            awaiting_header = true;
            continue;
        }
        if awaiting_header {
            awaiting_header = false;
            if line.trim().is_empty() {
                continue;
            }
            state = match block_keyword(&line) {
                Some("MATRIX") => ScanState::InMatrixBlock,
                _ => ScanState::InOtherBlock,
            };
        }
        if state == ScanState::InMatrixBlock {
            lines.push(line.trim().to_string());
        }
    }
    Ok(lines)
}

/// Parses six numbers into a matrix row. Unreadable values become NaN; a row that
/// does not hold exactly six values becomes all NaN.
fn parse_row(line: &str) -> [f64; 6] {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 6 {
        warn!(line, "Expected 6 values in matrix row");
        return [f64::NAN; 6];
    }
    let mut row = [f64::NAN; 6];
    for (slot, token) in row.iter_mut().zip(tokens) {
        match parse_fortran_float(token) {
            Some(value) => *slot = value,
            None => warn!(token, "Could not parse matrix value, using NaN"),
        }
    }
    row
}

/// Reads the six rows starting `skip` lines after `heading_index`.
fn parse_block(lines: &[String], heading_index: usize, skip: usize) -> Option<Matrix6<f64>> {
    let start = heading_index + skip;
    let rows = lines.get(start..start + 6)?;
    let mut matrix = Matrix6::from_element(f64::NAN);
    for (i, line) in rows.iter().enumerate() {
        for (j, value) in parse_row(line).into_iter().enumerate() {
            matrix[(i, j)] = value;
        }
    }
    Some(matrix)
}

fn parse_tune_token(token: Option<&str>, plane: &str) -> f64 {
    match token {
        Some("undefined") | None => {
            error!(plane, "Tune is undefined");
            -1.0
        }
        Some(token) => parse_fortran_float(token).unwrap_or_else(|| {
            error!(plane, token, "Could not parse tune");
            -1.0
        }),
    }
}

impl EngineOutput for MatrixOutput {
    type Error = MatrixParseError;

    fn read_from(reader: &mut impl BufRead) -> Result<Self, MatrixParseError> {
        let lines = matrix_block_lines(reader)?;
        if lines.is_empty() {
            return Err(MatrixParseError::NoMatrixBlock);
        }

        let mut output = MatrixOutput {
            transfer_matrix: None,
            twiss: None,
            tune: (-1.0, -1.0),
        };
        for (index, line) in lines.iter().enumerate() {
            if line == TRANSFER_MATRIX_HEADING {
                output.transfer_matrix = parse_block(&lines, index, 2);
                if output.transfer_matrix.is_none() {
                    warn!("Transfer matrix heading found without six rows after it");
                }
            } else if line == BEAM_MATRIX_HEADING {
                let beam_matrix = parse_block(&lines, index, 2);
                if beam_matrix.is_none() {
                    warn!("Beam matrix heading found without six rows after it");
                }
                output.twiss = beam_matrix.as_ref().map(TwissParameters::from_beam_matrix);
            } else if line.starts_with(TUNE_PREFIX) {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                output.tune = (
                    parse_tune_token(tokens.get(2).copied(), "Y"),
                    parse_tune_token(tokens.get(5).copied(), "Z"),
                );
            }
        }
        Ok(output)
    }
}

/// Parses the MATRIX output of a log.
///
/// # Errors
///
/// Returns [`MatrixParseError::NoMatrixBlock`] when the log holds no MATRIX block.
pub fn parse_matrix(reader: &mut impl BufRead) -> Result<MatrixOutput, MatrixParseError> {
    MatrixOutput::read_from(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MATRIX_LOG: &str = "\
Title line
****************************************************************************************
      1  Keyword, label(s) :  OBJET                                                   IPASS= 1

                          MAGNETIC  RIGIDITY =       1000.000 kG*cm
****************************************************************************************
      2  Keyword, label(s) :  MATRIX                                                  IPASS= 1

  Reference, before change of frame (part #     1)  :
  0.00000000E+00

  TRANSFER  MATRIX  ORDRE  1  (MKSA units)

  -0.500000      1.20000       0.00000       0.00000       0.00000       0.100000
  -0.625000     -0.500000      0.00000       0.00000       0.00000       0.200000
   0.00000       0.00000       0.800000      2.50000       0.00000       0.00000
   0.00000       0.00000      -0.144000      0.800000      0.00000       0.00000
   0.00000       0.00000       0.00000       0.00000       1.00000       0.00000
   0.00000       0.00000       0.00000       0.00000       0.00000       1.00000

          DetY-1 =      -0.0000000,    DetZ-1 =      -0.0000000

  Beam  matrix  (beta/-alpha/-alpha/gamma) and  periodic  dispersion  (MKSA units)

   1.38564      -0.00000       0.00000       0.00000       0.00000       0.150000
   0.00000       0.721688      0.00000       0.00000       0.00000       0.00000
   0.00000       0.00000       4.16667       0.250000      0.00000       0.00000
   0.00000       0.00000      -0.250000      0.255000      0.00000       0.00000
   0.00000       0.00000       0.00000       0.00000       0.00000       0.00000
   0.00000       0.00000       0.00000       0.00000       0.00000       0.00000

  NU_Y =  0.333333      NU_Z =   0.102416
****************************************************************************************
      3  Keyword, label(s) :  END                                                     IPASS= 1

                             0.00000 0.00000 0.00000 0.00000 0.00000 0.00000
";

    #[test]
    fn matrix_twiss_and_tunes_are_extracted() {
        let output = parse_matrix(&mut Cursor::new(MATRIX_LOG)).unwrap();

        let matrix = output.transfer_matrix.unwrap();
        assert_eq!(matrix[(0, 0)], -0.5);
        assert_eq!(matrix[(0, 1)], 1.2);
        assert_eq!(matrix[(3, 2)], -0.144);
        assert_eq!(matrix[(5, 5)], 1.0);

        let twiss = output.twiss.unwrap();
        assert_eq!(twiss.beta_y, 1.38564);
        assert_eq!(twiss.alpha_y, 0.0);
        assert_eq!(twiss.gamma_y, 0.721688);
        assert_eq!(twiss.disp_y, 0.15);
        assert_eq!(twiss.beta_z, 4.16667);
        assert_eq!(twiss.alpha_z, 0.25);
        assert_eq!(twiss.gamma_z, 0.255);

        assert_eq!(output.tune, (0.333333, 0.102416));
    }

    #[test]
    fn log_without_matrix_block_is_rejected() {
        let log = "Title\n*******\n  1  Keyword, label(s) :  OBJET\n  stuff\n";
        assert!(matches!(
            parse_matrix(&mut Cursor::new(log)),
            Err(MatrixParseError::NoMatrixBlock)
        ));
    }

    #[test]
    fn undefined_tunes_default_to_minus_one() {
        let log = "*******\n  2  Keyword, label(s) :  MATRIX\n  NU_Y = undefined  NU_Z = undefined\n";
        let output = parse_matrix(&mut Cursor::new(log)).unwrap();
        assert_eq!(output.tune, (-1.0, -1.0));
        assert_eq!(output.transfer_matrix, None);
    }

    #[test]
    fn older_header_layout_names_the_element_second() {
        assert_eq!(block_keyword("  2  MATRIX   label"), Some("MATRIX"));
        assert_eq!(
            block_keyword("  2  Keyword, label(s) :  MATRIX  IPASS= 1"),
            Some("MATRIX")
        );
        let log = "*******\n 12 MATRIX\n  NU_Y =  0.25 NU_Z = 0.5\n";
        assert_eq!(parse_matrix(&mut Cursor::new(log)).unwrap().tune, (0.25, 0.5));
    }

    #[test]
    fn malformed_rows_become_nan() {
        let log = format!(
            "*******\n 1 MATRIX\n{TRANSFER_MATRIX_HEADING}\n\n1 2 3\n{}",
            "1 x 0 0 0 0\n".repeat(5)
        );
        let matrix = parse_matrix(&mut Cursor::new(log))
            .unwrap()
            .transfer_matrix
            .unwrap();
        assert!(matrix.row(0).iter().all(|v| v.is_nan()));
        assert_eq!(matrix[(1, 0)], 1.0);
        assert!(matrix[(1, 1)].is_nan());
    }

    #[test]
    fn blank_header_keeps_the_previous_block_state() {
        let log = "*******\n 1 MATRIX\n*******\n\n  NU_Y =  0.1 NU_Z = 0.2\n";
        assert_eq!(parse_matrix(&mut Cursor::new(log)).unwrap().tune, (0.1, 0.2));
    }
}
