//! JSON session export

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ExportError;
use crate::session::Session;

#[derive(Serialize)]
struct JsonExport<'a> {
    tool: &'static str,
    version: &'static str,
    session: &'a Session,
}

/// Serialize the whole session (profile, outcome, samples, markers)
///
/// # Errors
/// Returns an error if serialization or the writer fails
pub fn write_json<W: Write>(mut writer: W, session: &Session) -> Result<(), ExportError> {
    let export = JsonExport { tool: "loadscope", version: env!("CARGO_PKG_VERSION"), session };
    serde_json::to_writer_pretty(&mut writer, &export)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// # Errors
/// Returns an error if the file cannot be created or written
pub fn write_json_file(path: &Path, session: &Session) -> Result<(), ExportError> {
    let file = File::create(path)?;
    write_json(BufWriter::new(file), session)
}
