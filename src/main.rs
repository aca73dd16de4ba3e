//! ShareMapper executable entry point.
//!
//! This binary uses the `sharemapper` library to:
//! 1. Parse command-line arguments.
//! 2. Prepare the output folder and the timestamped process/error logs.
//! 3. Stream the pipe-delimited inventory file through the aggregation
//!    engine in bounded-memory batches.
//! 4. Write the per-drive, per-top-level-folder overview report.
//! 5. Print a summary of the run.

use clap::Parser;
use human_bytes::human_bytes;

use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use sharemapper::{
    log_timestamp, process_stream, run_timestamp, write_report, Aggregator, RunLog,
    DEFAULT_CHUNK_SIZE,
};

/// Separator string used for console output sections.
const SECTION_SEPARATOR: &str =
    "==========================================================================================";

// --- Command Line Argument Definition ---
/// Defines the command-line arguments accepted by the ShareMapper application,
/// powered by the `clap` crate.
#[derive(Parser, Debug)]
#[command(version, about = "Summarizes storage consumption per top-level share folder from a pipe-delimited inventory export.", long_about = None)]
struct Args {
    /// Label embedded in the generated report filename.
    file_identity: String,

    /// Path to the pipe-delimited inventory file to ingest.
    input_file: PathBuf,

    /// Folder where the report and logs are written. Created if absent.
    output_folder: PathBuf,

    /// Number of rows buffered per processing batch.
    /// Can also be set via the `SM_CHUNK_SIZE` environment variable.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, env = "SM_CHUNK_SIZE")]
    chunk_size: usize,
}

/// Main application entry point.
/// Parses arguments, streams the inventory file and writes the report.
///
/// # Returns
/// * `Ok(())` on successful completion.
/// * `Err(Box<dyn std::error::Error>)` when a fatal step fails: the input
///   file cannot be opened, the output folder or its files cannot be
///   created, or the stream dies mid-read. Row-level failures are logged
///   to the error log and never abort the run.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- Parse Command Line Arguments ---
    let args = Args::parse();
    let overall_start_time = Instant::now();
    let stamp = run_timestamp();

    // --- Print Configuration & Start ---
    println!("Starting ShareMapper...");
    println!("{SECTION_SEPARATOR}");
    println!("Configuration:");
    println!("  Input File: {}", args.input_file.display());
    println!("  Output Folder: {}", args.output_folder.display());
    println!("  File Identity: {}", args.file_identity);
    println!("  Chunk Size: {} rows", args.chunk_size);
    println!("{SECTION_SEPARATOR}");

    // --- Create Output Folder ---
    if let Err(e) = fs::create_dir_all(&args.output_folder) {
        eprintln!(
            "Fatal Error: Cannot create output folder '{}': {}",
            args.output_folder.display(),
            e
        );
        return Err(Box::new(e));
    }

    let process_log_path = args.output_folder.join(format!("process_log_{stamp}.txt"));
    let error_log_path = args.output_folder.join(format!("error_log_{stamp}.txt"));
    let report_path = args
        .output_folder
        .join(format!("overview_{}_{stamp}.csv", args.file_identity));

    let mut process_log = RunLog::create(&process_log_path)?;
    let mut error_log = RunLog::create(&error_log_path)?;

    process_log.echo(&format!(
        "Starting processing: {}",
        args.input_file.display()
    ))?;

    // --- Open Input & Run the Aggregation Engine ---
    let input = match File::open(&args.input_file) {
        Ok(file) => file,
        Err(e) => {
            let message = format!(
                "[FATAL] Cannot open input file '{}': {}",
                args.input_file.display(),
                e
            );
            error_log.log(&message)?;
            eprintln!("{message}");
            return Err(Box::new(e));
        }
    };

    let mut aggregator = Aggregator::new();
    let summary = match process_stream(
        BufReader::new(input),
        args.chunk_size,
        &mut aggregator,
        &mut process_log,
        &mut error_log,
    ) {
        Ok(summary) => summary,
        Err(e) => {
            let message = format!(
                "[FATAL] Unrecoverable read failure on '{}': {}",
                args.input_file.display(),
                e
            );
            error_log.log(&message)?;
            eprintln!("{message}");
            return Err(Box::new(e));
        }
    };

    // --- Write the Overview Report ---
    if let Err(e) = write_report(&report_path, &aggregator) {
        let message = format!(
            "[FATAL] Cannot write report '{}': {}",
            report_path.display(),
            e
        );
        error_log.log(&message)?;
        eprintln!("{message}");
        return Err(Box::new(e));
    }

    let execution_secs = overall_start_time.elapsed().as_secs_f64();
    process_log.echo(&format!(
        "Processing completed in {execution_secs:.2} seconds. Output saved at: {}",
        report_path.display()
    ))?;
    process_log.echo(&format!(
        "[{}] Processed: {}, Execution Time: {execution_secs:.2} seconds",
        log_timestamp(),
        args.input_file.display()
    ))?;
    process_log.echo(&format!("Log written to: {}", process_log_path.display()))?;

    // --- Print Summary ---
    println!("{SECTION_SEPARATOR}");
    println!("Processing Summary:");
    println!("  Server: {}", aggregator.server_name());
    println!("  Rows read: {}", summary.rows_read);
    println!("  Rows aggregated: {}", summary.rows_applied);
    println!("  Rows skipped: {}", summary.rows_skipped);
    println!("  Warnings: {}", summary.warnings);
    println!("  Folder buckets: {}", aggregator.bucket_count());
    println!("  Files counted: {}", aggregator.total_file_count());
    println!(
        "  Total data attributed: {}",
        human_bytes(aggregator.total_size_bytes() as f64)
    );
    println!("{SECTION_SEPARATOR}");

    Ok(())
}
