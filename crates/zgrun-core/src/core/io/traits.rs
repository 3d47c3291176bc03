use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Defines the interface for text the engine reads as its program input.
pub trait EngineInput {
    /// Writes the engine input text to a writer.
    ///
    /// # Arguments
    ///
    /// * `writer` - The writer to output to.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()>;

    /// Writes the engine input text to a file path, replacing any existing file.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the file to write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or writing fails.
    fn write_to_path<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()
    }
}

/// Defines the interface for parsing a file the engine writes.
///
/// Implementors handle one output format each; the engine owns the format, so parsers
/// should tolerate anomalies where they can and report them through `tracing`.
pub trait EngineOutput: Sized {
    /// The error type for parsing and I/O failures.
    type Error: Error + From<io::Error>;

    /// Parses the output from a buffered reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The buffered reader to read from.
    ///
    /// # Return
    ///
    /// Returns the parsed output.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or I/O operations encounter issues.
    fn read_from(reader: &mut impl BufRead) -> Result<Self, Self::Error>;

    /// Parses the output from a file path.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the file to read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsing fails.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }
}
