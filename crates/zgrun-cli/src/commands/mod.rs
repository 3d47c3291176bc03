pub mod run;
pub mod track;

use crate::error::{CliError, Result};
use std::path::Path;
use zgrun::core::io::input::parse_program;
use zgrun::core::models::line::Line;

/// Reads a zgoubi input file into a line named after its title, or after the file.
pub(crate) fn load_program(path: &Path) -> Result<Line> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    let fallback = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "line".to_string());
    Ok(parse_program(&text, &fallback))
}

pub(crate) fn check_aux_files(files: &[impl AsRef<Path>]) -> Result<()> {
    for file in files {
        let file = file.as_ref();
        if !file.exists() {
            return Err(CliError::Argument(format!(
                "Auxiliary file does not exist: {}",
                file.display()
            )));
        }
    }
    Ok(())
}
