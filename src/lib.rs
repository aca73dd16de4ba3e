use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

/// Bucket label used when a path has no directory segment below the share.
pub const NOT_APPLICABLE: &str = "Not Applicable";
/// Server identity reported when no row ever supplied one.
pub const UNKNOWN_SERVER: &str = "Unknown";
/// Default number of rows buffered per processing batch.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Raw rows with fewer fields than this are rejected before extraction.
const MIN_RAW_FIELDS: usize = 3;
const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

// --- Data Structures ---

/// Identity of one aggregate bucket: a `\\host\share` drive plus the
/// top-level folder directly below it (or [`NOT_APPLICABLE`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderKey {
    pub drive: String,
    pub top_level_folder: String,
}

/// Running totals for one [`FolderKey`]. Created zero-initialized on first
/// use and only ever grows; nothing is removed until the run ends.
#[derive(Debug, Default)]
pub struct FolderAggregate {
    pub size_bytes: u64,
    pub subfolders: HashSet<String>,
    pub file_count: u64,
}

/// Result of decomposing one raw path string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedPath {
    pub key: FolderKey,
    /// Cumulative subfolder paths below the top-level folder, in
    /// shallow-to-deep order.
    pub subfolders: Vec<String>,
    pub leaf_is_file: bool,
}

/// Why a row was excluded from aggregation. Each rejected row produces one
/// error-log line and contributes nothing to any bucket.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RowRejection {
    #[error("too few columns")]
    TooFewColumns,
    #[error("no path-bearing field found")]
    MissingPath,
    #[error("path is missing host and share segments")]
    MalformedPath,
}

/// Degraded-parse diagnostics. These never reject the row; the driver
/// routes them into the process log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowWarning {
    #[error("size field '{value}' overflows the 64-bit size counter; counted as 0")]
    SizeOverflow { value: String },
    #[error("one or more fields contained invalid UTF-8; undecodable bytes were replaced")]
    LossyDecode,
}

// --- Row Extractor ---

fn is_path_field(field: &str) -> bool {
    field.contains('\\') && field.contains('.')
}

fn strip_quotes(field: &str) -> &str {
    field.trim().trim_matches(|c| c == '"' || c == '\'')
}

fn is_size_field(field: &str) -> bool {
    let digits = strip_quotes(field);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Scans the fields left to right for the first one that looks like a
/// backslash-delimited path. Column order in inventory exports is not
/// stable, so position is never trusted.
pub fn find_path(fields: &[String]) -> Option<&str> {
    fields.iter().find(|f| is_path_field(f)).map(|f| f.trim())
}

/// Scans the fields left to right for the first all-digit value (after
/// trimming surrounding quotes) and parses it as the size in bytes.
/// A missing size field is not an error; the row counts with size 0.
pub fn find_size(fields: &[String]) -> (u64, Option<RowWarning>) {
    for field in fields {
        let digits = strip_quotes(field);
        if !is_size_field(field) {
            continue;
        }
        return match digits.parse::<u64>() {
            Ok(size) => (size, None),
            Err(_) => (
                0,
                Some(RowWarning::SizeOverflow {
                    value: digits.to_string(),
                }),
            ),
        };
    }
    (0, None)
}

// --- Path Decomposer ---

/// Splits a raw path into its drive, top-level folder and cumulative
/// subfolder chain. Pure: the same input always yields the same output.
///
/// The first two directory segments form the `\\host\share` drive and the
/// third becomes the top-level folder. Every deeper directory segment
/// contributes one cumulative subfolder path. When the leaf looks like a
/// file name (contains a period) the deepest generated entry duplicates
/// the file's parent chain and is dropped, provided a shallower entry
/// already implies it. A leaf without a period counts as a folder, even
/// when it is really an extensionless file.
pub fn decompose_path(raw: &str) -> Result<DecomposedPath, RowRejection> {
    let trimmed = raw.trim().trim_matches('\\');
    let segments: Vec<&str> = trimmed.split('\\').collect();
    let (leaf, dirs) = match segments.split_last() {
        Some((leaf, dirs)) => (*leaf, dirs),
        None => return Err(RowRejection::MalformedPath),
    };
    if dirs.len() < 2 {
        return Err(RowRejection::MalformedPath);
    }

    let drive = format!("\\\\{}\\{}", dirs[0], dirs[1]);
    let top_level_folder = match dirs.get(2) {
        Some(segment) => segment.to_string(),
        None => NOT_APPLICABLE.to_string(),
    };
    let leaf_is_file = leaf.contains('.');

    let mut subfolders: Vec<String> = (3..dirs.len()).map(|i| dirs[3..=i].join("\\")).collect();
    if leaf_is_file && subfolders.len() > 1 {
        subfolders.pop();
    }

    Ok(DecomposedPath {
        key: FolderKey {
            drive,
            top_level_folder,
        },
        subfolders,
        leaf_is_file,
    })
}

/// One row's contribution, ready to be applied to the aggregate store.
#[derive(Debug)]
pub struct Attribution {
    pub path: DecomposedPath,
    pub size_bytes: u64,
    pub warning: Option<RowWarning>,
}

/// Runs the extractor and decomposer over one row's fields.
pub fn attribute_row(fields: &[String]) -> Result<Attribution, RowRejection> {
    let raw_path = find_path(fields).ok_or(RowRejection::MissingPath)?;
    let path = decompose_path(raw_path)?;
    let (size_bytes, warning) = find_size(fields);
    Ok(Attribution {
        path,
        size_bytes,
        warning,
    })
}

// --- Aggregator ---

/// Owns the mapping from [`FolderKey`] to running totals for one run.
///
/// Buckets are created lazily, mutated monotonically and never removed.
/// Discovery order is recorded so [`Aggregator::snapshot`] reproduces the
/// same row order for identical input.
#[derive(Debug, Default)]
pub struct Aggregator {
    buckets: HashMap<FolderKey, FolderAggregate>,
    discovery_order: Vec<FolderKey>,
    server_name: Option<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one row's contribution: adds the size, unions the subfolder
    /// set and counts the file.
    pub fn apply(&mut self, key: FolderKey, size_bytes: u64, subfolders: Vec<String>) {
        if !self.buckets.contains_key(&key) {
            self.discovery_order.push(key.clone());
        }
        let bucket = self.buckets.entry(key).or_default();
        bucket.size_bytes = bucket.size_bytes.saturating_add(size_bytes);
        bucket.subfolders.extend(subfolders);
        bucket.file_count += 1;
    }

    /// Records the server identity once. Later calls are ignored so the
    /// first successfully attributed row wins.
    pub fn note_server_name(&mut self, name: &str) {
        if self.server_name.is_some() {
            return;
        }
        let name = name.trim();
        if !name.is_empty() {
            self.server_name = Some(name.to_string());
        }
    }

    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(UNKNOWN_SERVER)
    }

    /// Read-only view of all buckets in first-seen order. Stable across
    /// calls within a run.
    pub fn snapshot(&self) -> Vec<(&FolderKey, &FolderAggregate)> {
        self.discovery_order
            .iter()
            .filter_map(|key| self.buckets.get(key).map(|aggregate| (key, aggregate)))
            .collect()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.buckets
            .values()
            .fold(0u64, |total, bucket| total.saturating_add(bucket.size_bytes))
    }

    pub fn total_file_count(&self) -> u64 {
        self.buckets.values().map(|bucket| bucket.file_count).sum()
    }
}

// --- Run Logs ---

/// Append-only text log backed by a file. The process log and the error
/// log are both instances of this.
#[derive(Debug)]
pub struct RunLog {
    writer: BufWriter<File>,
}

impl RunLog {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Appends one line to the log file.
    pub fn log(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.writer, "{message}")?;
        self.writer.flush()
    }

    /// Appends one line and echoes it to the console. Used for the
    /// milestone messages a run always emits.
    pub fn echo(&mut self, message: &str) -> io::Result<()> {
        println!("{message}");
        self.log(message)
    }
}

/// Compact `YYYYMMDD_HHMMSS` stamp shared by the log and report filenames
/// of one run. Falls back to UTC when the local offset is indeterminate.
pub fn run_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))
    .unwrap_or_else(|_| String::from("00000000_000000"))
}

/// Human-readable wall-clock stamp for log message bodies.
pub fn log_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

// --- Chunked Stream Driver ---

/// Counters describing one completed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_read: u64,
    pub rows_applied: u64,
    pub rows_skipped: u64,
    pub warnings: u64,
}

/// A decoded row waiting in the current batch.
#[derive(Debug)]
struct PendingRow {
    line: u64,
    fields: Vec<String>,
    lossy: bool,
}

/// Reads the pipe-delimited input to exhaustion, feeding every row through
/// extractor, decomposer and aggregator.
///
/// The first line is treated as a header and skipped. Rows accumulate into
/// batches of `chunk_size` so peak memory stays bounded; batches are not a
/// unit of anything else. Per-row failures are written to the error log
/// and never interrupt the run. Only an I/O failure on the underlying
/// stream aborts.
pub fn process_stream<R: Read>(
    input: R,
    chunk_size: usize,
    aggregator: &mut Aggregator,
    process_log: &mut RunLog,
    error_log: &mut RunLog,
) -> io::Result<RunSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .quote(b'"')
        .flexible(true)
        .has_headers(true)
        .from_reader(input);

    let mut summary = RunSummary::default();
    let mut chunk: Vec<PendingRow> = Vec::with_capacity(chunk_size.min(DEFAULT_CHUNK_SIZE));

    for result in reader.byte_records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map(|p| p.line()).unwrap_or(0);
                match err.into_kind() {
                    csv::ErrorKind::Io(io_err) => return Err(io_err),
                    _ => {
                        summary.rows_read += 1;
                        summary.rows_skipped += 1;
                        error_log
                            .log(&format!("[SKIPPED] Line {line}: unreadable record; row skipped."))?;
                        continue;
                    }
                }
            }
        };
        summary.rows_read += 1;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.len() < MIN_RAW_FIELDS {
            summary.rows_skipped += 1;
            error_log.log(&format!(
                "[SKIPPED] Line {line}: {}; row skipped.",
                RowRejection::TooFewColumns
            ))?;
            continue;
        }

        let mut fields = Vec::with_capacity(record.len());
        let mut lossy = false;
        for raw in record.iter() {
            match std::str::from_utf8(raw) {
                Ok(text) => fields.push(text.to_string()),
                Err(_) => {
                    lossy = true;
                    fields.push(String::from_utf8_lossy(raw).into_owned());
                }
            }
        }

        chunk.push(PendingRow { line, fields, lossy });
        if chunk.len() >= chunk_size {
            drain_chunk(&mut chunk, aggregator, process_log, error_log, &mut summary)?;
        }
    }

    // The final partial batch goes through the same path as full ones.
    drain_chunk(&mut chunk, aggregator, process_log, error_log, &mut summary)?;
    Ok(summary)
}

fn drain_chunk(
    chunk: &mut Vec<PendingRow>,
    aggregator: &mut Aggregator,
    process_log: &mut RunLog,
    error_log: &mut RunLog,
    summary: &mut RunSummary,
) -> io::Result<()> {
    for row in chunk.drain(..) {
        if row.lossy {
            summary.warnings += 1;
            process_log.log(&format!(
                "[WARNING] Line {}: {}",
                row.line,
                RowWarning::LossyDecode
            ))?;
        }
        match attribute_row(&row.fields) {
            Ok(attribution) => {
                if let Some(warning) = attribution.warning {
                    summary.warnings += 1;
                    process_log.log(&format!("[WARNING] Line {}: {warning}", row.line))?;
                }
                if let Some(first) = row.fields.first() {
                    aggregator.note_server_name(first);
                }
                aggregator.apply(
                    attribution.path.key,
                    attribution.size_bytes,
                    attribution.path.subfolders,
                );
                summary.rows_applied += 1;
            }
            Err(reason) => {
                summary.rows_skipped += 1;
                error_log.log(&format!(
                    "[SKIPPED] Line {}: {reason}; row skipped.",
                    row.line
                ))?;
            }
        }
    }
    Ok(())
}

// --- Report Emitter ---

pub const REPORT_HEADER: [&str; 6] = [
    "Server_Name",
    "Drive",
    "Top Level Folder",
    "Data(GB)",
    "Number of SubFolders",
    "Number of Files",
];

#[derive(Debug, Serialize)]
struct ReportRow {
    #[serde(rename = "Server_Name")]
    server_name: String,
    #[serde(rename = "Drive")]
    drive: String,
    #[serde(rename = "Top Level Folder")]
    top_level_folder: String,
    #[serde(rename = "Data(GB)")]
    data_gb: String,
    #[serde(rename = "Number of SubFolders")]
    subfolder_count: u64,
    #[serde(rename = "Number of Files")]
    file_count: u64,
}

/// Converts a byte count to gigabytes (binary, 1024^3) with two decimal
/// places, the unit the report promises in its header.
pub fn bytes_to_gb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_GB)
}

/// Writes the final report from the aggregator's snapshot: one row per
/// folder key, every field quoted, pipe-delimited. The header row is
/// written even when no row was ever attributed.
pub fn write_report(path: &Path, aggregator: &Aggregator) -> csv::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'|')
        .quote_style(csv::QuoteStyle::Always)
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(REPORT_HEADER)?;
    let server_name = aggregator.server_name();
    for (key, aggregate) in aggregator.snapshot() {
        writer.serialize(ReportRow {
            server_name: server_name.to_string(),
            drive: key.drive.clone(),
            top_level_folder: key.top_level_folder.clone(),
            data_gb: bytes_to_gb(aggregate.size_bytes),
            subfolder_count: aggregate.subfolders.len() as u64,
            file_count: aggregate.file_count,
        })?;
    }
    writer.flush()?;
    Ok(())
}
