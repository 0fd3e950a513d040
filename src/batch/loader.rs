//! Tab-separated input parsing.
//!
//! Line 0 is the header. Every later non-blank line becomes a row whose id is
//! its line number, so ids stay stable when the same file is loaded again.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::batch::types::{ParameterRow, RowId};
use crate::{MultiCmdError, Result};

/// Parsed input: column headers and rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedTable {
    pub headers: Vec<String>,
    pub rows: Vec<ParameterRow>,
}

fn split_fields(line: &str) -> Vec<String> {
    line.trim_end().split('\t').map(str::to_string).collect()
}

/// Parse tab-separated text from any reader
pub fn parse_reader<R: Read>(reader: R) -> Result<LoadedTable> {
    let mut lines = BufReader::new(reader).lines();

    let headers = match lines.next() {
        Some(line) => split_fields(&line?),
        None => return Err(MultiCmdError::Load("input has no header line".to_string())),
    };

    let mut rows = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let id = (index + 1) as RowId;
        rows.push(ParameterRow::new(id, split_fields(&line)));
    }

    debug!(columns = headers.len(), rows = rows.len(), "Parsed input table");
    Ok(LoadedTable { headers, rows })
}

/// Parse a tab-separated file
pub fn parse_file(path: impl AsRef<Path>) -> Result<LoadedTable> {
    let file = File::open(path.as_ref())?;
    parse_reader(file)
}

/// Write headers and row values back out as tab-separated text.
///
/// Results are not written. Ids are not preserved: loading the output again
/// numbers rows by their new line positions.
pub fn write_table<W: Write>(mut writer: W, headers: &[String], rows: &[ParameterRow]) -> Result<()> {
    writeln!(writer, "{}", headers.join("\t"))?;
    for row in rows {
        writeln!(writer, "{}", row.values.join("\t"))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a tab-separated file
pub fn write_file(path: impl AsRef<Path>, headers: &[String], rows: &[ParameterRow]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_table(std::io::BufWriter::new(file), headers, rows)
}
