//! CSV export and re-import
//!
//! ```text
//! Time (s), CPU Load (%), Temperature (C), Power (W)
//! 0.500000, 49.87, 61.00, 23.41
//! 1.000000, 50.12, ,                    <- sensors unavailable: blank
//! --- Event Markers ---
//! Time (s), Event
//! 0.734012, fan spun up
//! ```
//!
//! The marker section is always present, so a file holds
//! `samples + markers + 3` lines. Times are written exactly to the
//! microsecond, the resolution markers are kept apart at.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::domain::ExportError;
use crate::session::{Marker, Sample};

pub const SAMPLE_HEADER: &str = "Time (s), CPU Load (%), Temperature (C), Power (W)";
pub const MARKER_SEPARATOR: &str = "--- Event Markers ---";
pub const MARKER_HEADER: &str = "Time (s), Event";

const FIELD_SEPARATOR: &str = ", ";

/// Write samples and markers in the CSV layout
///
/// # Errors
/// Returns an error if the writer fails
pub fn write_csv<W: Write>(
    mut writer: W,
    samples: &[Sample],
    markers: &[Marker],
) -> Result<(), ExportError> {
    writeln!(writer, "{SAMPLE_HEADER}")?;
    for sample in samples {
        let fields = [
            format_time(sample.elapsed),
            format!("{:.2}", sample.load_percent),
            optional(sample.temperature_celsius),
            optional(sample.power_watts),
        ];
        writeln!(writer, "{}", fields.join(FIELD_SEPARATOR))?;
    }

    writeln!(writer, "{MARKER_SEPARATOR}")?;
    writeln!(writer, "{MARKER_HEADER}")?;
    for marker in markers {
        writeln!(
            writer,
            "{}{FIELD_SEPARATOR}{}",
            format_time(marker.elapsed),
            quote_note(&marker.note)
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the CSV export to `path`, replacing any existing file
///
/// # Errors
/// Returns an error if the file cannot be created or written
pub fn write_csv_file(path: &Path, samples: &[Sample], markers: &[Marker]) -> Result<(), ExportError> {
    let file = File::create(path)?;
    write_csv(BufWriter::new(file), samples, markers)
}

/// Seconds with six decimals, from integer parts so nothing is rounded
fn format_time(elapsed: Duration) -> String {
    format!("{}.{:06}", elapsed.as_secs(), elapsed.subsec_micros())
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

fn quote_note(note: &str) -> String {
    let needs_quotes = note.contains([',', '"', '\n', '\r'])
        || note.starts_with(char::is_whitespace)
        || note.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("\"{}\"", note.replace('"', "\"\""))
    } else {
        note.to_string()
    }
}

/// Contents of a parsed CSV export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCsv {
    pub samples: Vec<Sample>,
    pub markers: Vec<Marker>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    SampleHeader,
    Samples,
    MarkerHeader,
    Markers,
}

/// Parse a CSV export back into samples and markers
///
/// # Errors
/// Returns [`ExportError::Parse`] with the 1-based line number of the first
/// line that does not fit the format
pub fn parse(input: &str) -> Result<ParsedCsv, ExportError> {
    let mut parsed = ParsedCsv::default();
    let mut section = Section::SampleHeader;
    let mut last_line = 0;

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        last_line = line_no;
        let err = |detail: String| ExportError::Parse { line: line_no, detail };

        match section {
            Section::SampleHeader => {
                if line.trim() != SAMPLE_HEADER {
                    return Err(err(format!("expected header {SAMPLE_HEADER:?}")));
                }
                section = Section::Samples;
            }
            Section::Samples => {
                if line.trim() == MARKER_SEPARATOR {
                    section = Section::MarkerHeader;
                    continue;
                }
                parsed.samples.push(parse_sample(line).map_err(err)?);
            }
            Section::MarkerHeader => {
                if line.trim() != MARKER_HEADER {
                    return Err(err(format!("expected header {MARKER_HEADER:?}")));
                }
                section = Section::Markers;
            }
            Section::Markers => {
                if line.trim().is_empty() {
                    continue;
                }
                parsed.markers.push(parse_marker(line).map_err(err)?);
            }
        }
    }

    if section != Section::Markers {
        return Err(ExportError::Parse {
            line: last_line,
            detail: "file ends before the event marker section".to_string(),
        });
    }
    Ok(parsed)
}

/// Read and parse the CSV export at `path`
///
/// # Errors
/// Returns an error if the file cannot be read or does not parse
pub fn parse_file(path: &Path) -> Result<ParsedCsv, ExportError> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [time, load, temperature, power] = fields.as_slice() else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };
    Ok(Sample {
        elapsed: parse_time(time)?,
        load_percent: parse_number(load, "load")?,
        temperature_celsius: parse_optional(temperature, "temperature")?,
        power_watts: parse_optional(power, "power")?,
    })
}

fn parse_marker(line: &str) -> Result<Marker, String> {
    let (time, rest) = line.split_once(',').ok_or("expected time and event")?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let note = if rest.starts_with('"') { unquote(rest)? } else { rest.to_string() };
    Ok(Marker { elapsed: parse_time(time.trim())?, note })
}

fn unquote(field: &str) -> Result<String, String> {
    let inner = field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .ok_or("unterminated quoted event")?;
    if inner.replace("\"\"", "").contains('"') {
        return Err("stray quote in quoted event".to_string());
    }
    Ok(inner.replace("\"\"", "\""))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_time(field: &str) -> Result<Duration, String> {
    let secs = parse_number(field, "time")?;
    if secs < 0.0 {
        return Err(format!("negative time {field:?}"));
    }
    Ok(Duration::from_micros((secs * 1_000_000.0).round() as u64))
}

fn parse_number(field: &str, what: &str) -> Result<f64, String> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid {what} {field:?}"))
}

fn parse_optional(field: &str, what: &str) -> Result<Option<f64>, String> {
    if field.is_empty() {
        Ok(None)
    } else {
        parse_number(field, what).map(Some)
    }
}
