use super::traits::EngineOutput;
use phf::{Set, phf_set};
use std::io::{self, BufRead};

/// Log lines the engine writes when it could not make sense of its input. A run that
/// prints one of these produced meaningless output even if it exited cleanly.
pub static FATAL_LOG_MARKERS: Set<&'static str> = phf_set! {
    "SBR OBJ3 -> error in  reading  file",
};

/// Lowercase substrings that make a log line worth reporting.
const NOTABLE_MARKERS: [&str; 3] = ["error", "warning", "sbr"];

/// Banners printed by different engine versions on normal completion.
pub const COMPLETION_BANNERS: [&str; 3] = [
    "MAIN PROGRAM : Execution ended upon key  END",
    "ZGOUBI RUN COMPLETED",
    "Execution ended normally, upon keyword END or FIN",
];

pub const REBELOTE_COMPLETION_BANNER: &str = "End  of  'REBELOTE'  procedure";

const PARTICLE_SECTION: &str = "PARTICUL";
const PARTICLE_TABLE_HEADER: &str = "I, AMQ(1,I)";

/// A log line that mentions an error, warning or subroutine message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFinding {
    pub line_number: usize,
    pub text: String,
}

/// Result of scanning an engine log.
///
/// Scanning stops at the first fatal line, so `findings` only covers the log up to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogScan {
    pub findings: Vec<LogFinding>,
    pub fatal: Option<LogFinding>,
}

impl EngineOutput for LogScan {
    type Error = io::Error;

    fn read_from(reader: &mut impl BufRead) -> io::Result<Self> {
        let mut scan = LogScan::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let lower = line.to_lowercase();
            if !NOTABLE_MARKERS.iter().any(|marker| lower.contains(marker)) {
                continue;
            }
            let finding = LogFinding {
                line_number: index + 1,
                text: line.trim_end().to_string(),
            };
            if FATAL_LOG_MARKERS.iter().any(|marker| line.contains(marker)) {
                scan.fatal = Some(finding);
                break;
            }
            scan.findings.push(finding);
        }
        Ok(scan)
    }
}

/// Scans a log for notable lines, stopping at the first fatal one.
pub fn scan_log(reader: &mut impl BufRead) -> io::Result<LogScan> {
    LogScan::read_from(reader)
}

fn contains_any(reader: &mut impl BufRead, needles: &[&str]) -> io::Result<bool> {
    for line in reader.lines() {
        let line = line?;
        if needles.iter().any(|needle| line.contains(needle)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `true` if the log carries one of the engine's completion banners.
pub fn run_completed(reader: &mut impl BufRead) -> io::Result<bool> {
    contains_any(reader, &COMPLETION_BANNERS)
}

/// `true` if a REBELOTE loop ran to its end.
pub fn rebelote_completed(reader: &mut impl BufRead) -> io::Result<bool> {
    contains_any(reader, &[REBELOTE_COMPLETION_BANNER])
}

/// The particle-definition section of a log, up to the per-species table.
pub fn particle_info(reader: &mut impl BufRead) -> io::Result<String> {
    let mut lines = reader.lines();
    let mut past_input = false;
    let mut in_particle = false;
    let mut out = String::new();

    while let Some(line) = lines.next() {
        let line = line?;
        if line.starts_with("***") {
            if in_particle {
                break;
            }
            past_input = true;
            let header = lines.next().transpose()?.unwrap_or_default();
            in_particle = header.split_whitespace().last() == Some(PARTICLE_SECTION);
            continue;
        }
        if !past_input || !in_particle {
            continue;
        }
        if line.trim().starts_with(PARTICLE_TABLE_HEADER) {
            break;
        }
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}
