use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use sharemapper::{process_stream, write_report, Aggregator, RunLog, RunSummary};

struct RunOutcome {
    dir: tempfile::TempDir,
    aggregator: Aggregator,
    summary: RunSummary,
    error_log_path: PathBuf,
}

/// Streams `input` through the engine inside a scratch folder, the same
/// way the binary wires things together.
fn run_over(input: &str) -> RunOutcome {
    run_over_chunked(input, 100_000)
}

fn run_over_chunked(input: &str, chunk_size: usize) -> RunOutcome {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("inventory.psv");
    fs::write(&input_path, input).unwrap();

    let process_log_path = dir.path().join("process_log.txt");
    let error_log_path = dir.path().join("error_log.txt");
    let mut process_log = RunLog::create(&process_log_path).unwrap();
    let mut error_log = RunLog::create(&error_log_path).unwrap();

    let mut aggregator = Aggregator::new();
    let summary = process_stream(
        BufReader::new(File::open(&input_path).unwrap()),
        chunk_size,
        &mut aggregator,
        &mut process_log,
        &mut error_log,
    )
    .unwrap();

    RunOutcome {
        dir,
        aggregator,
        summary,
        error_log_path,
    }
}

fn report_lines(outcome: &RunOutcome) -> Vec<String> {
    let report_path = outcome.dir.path().join("overview.csv");
    write_report(&report_path, &outcome.aggregator).unwrap();
    fs::read_to_string(&report_path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

const HEADER_LINE: &str =
    r#""Server_Name"|"Drive"|"Top Level Folder"|"Data(GB)"|"Number of SubFolders"|"Number of Files""#;

#[test]
fn two_rows_roll_up_into_one_folder_bucket() {
    let outcome = run_over(
        r"ServerName|FullName|Length
SRV1|\\SRV1\ShareA\Reports\2023\file1.txt|1000
SRV1|\\SRV1\ShareA\Reports\2024\file2.txt|2000
",
    );

    assert_eq!(outcome.summary.rows_read, 2);
    assert_eq!(outcome.summary.rows_applied, 2);
    assert_eq!(outcome.summary.rows_skipped, 0);
    assert_eq!(outcome.aggregator.server_name(), "SRV1");

    let lines = report_lines(&outcome);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], HEADER_LINE);
    assert_eq!(
        lines[1],
        r#""SRV1"|"\\SRV1\ShareA"|"Reports"|"0.00"|"2"|"2""#
    );
}

#[test]
fn one_malformed_row_is_logged_and_the_rest_aggregate() {
    let outcome = run_over(
        r"ServerName|FullName|Length
a|b
SRV1|\\SRV1\ShareA\Reports\2023\file1.txt|1000
SRV1|\\SRV1\ShareA\Reports\2024\file2.txt|2000
",
    );

    assert_eq!(outcome.summary.rows_read, 3);
    assert_eq!(outcome.summary.rows_applied, 2);
    assert_eq!(outcome.summary.rows_skipped, 1);

    let error_log = fs::read_to_string(&outcome.error_log_path).unwrap();
    let skipped: Vec<&str> = error_log
        .lines()
        .filter(|l| l.starts_with("[SKIPPED]"))
        .collect();
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0].starts_with("[SKIPPED] Line 2:"), "{}", skipped[0]);

    let lines = report_lines(&outcome);
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[1],
        r#""SRV1"|"\\SRV1\ShareA"|"Reports"|"0.00"|"2"|"2""#
    );
}

#[test]
fn a_gibibyte_reports_as_one_point_zero_zero() {
    let outcome = run_over(
        r"ServerName|FullName|Length
SRV1|\\SRV1\ShareA\Reports\big.bin|1073741824
",
    );

    let lines = report_lines(&outcome);
    assert_eq!(
        lines[1],
        r#""SRV1"|"\\SRV1\ShareA"|"Reports"|"1.00"|"0"|"1""#
    );
}

#[test]
fn fully_rejected_input_still_yields_a_header_only_report() {
    let outcome = run_over(
        r"ServerName|FullName|Length
a|b|c
d|e|f
",
    );

    assert_eq!(outcome.summary.rows_applied, 0);
    assert_eq!(outcome.summary.rows_skipped, 2);
    assert_eq!(outcome.aggregator.server_name(), "Unknown");

    let error_log = fs::read_to_string(&outcome.error_log_path).unwrap();
    assert_eq!(error_log.lines().count(), 2);

    let lines = report_lines(&outcome);
    assert_eq!(lines, vec![HEADER_LINE.to_string()]);
}

#[test]
fn field_positions_do_not_matter() {
    // Size column ahead of the path column, and quoted.
    let outcome = run_over(
        "ServerName|Length|FullName\nSRV2|\"2048\"|\\\\SRV2\\ShareB\\Data\\file.bin\n",
    );

    assert_eq!(outcome.summary.rows_applied, 1);
    let lines = report_lines(&outcome);
    assert_eq!(lines[1], r#""SRV2"|"\\SRV2\ShareB"|"Data"|"0.00"|"0"|"1""#);
}

#[test]
fn rows_without_a_numeric_field_count_with_zero_size() {
    let outcome = run_over(
        r"ServerName|FullName|Length
SRV1|\\SRV1\ShareA\Reports\a.txt|notanumber
",
    );

    assert_eq!(outcome.summary.rows_applied, 1);
    let lines = report_lines(&outcome);
    assert_eq!(
        lines[1],
        r#""SRV1"|"\\SRV1\ShareA"|"Reports"|"0.00"|"0"|"1""#
    );
}

#[test]
fn tiny_batches_match_unbatched_results() {
    let input = r"ServerName|FullName|Length
SRV1|\\SRV1\ShareA\Reports\2023\file1.txt|1000
SRV1|\\SRV1\ShareA\Reports\2024\file2.txt|2000
SRV1|\\SRV1\ShareB\Media\clips\clip.mp4|4000
";

    let unbatched = run_over(input);
    let expected_lines = report_lines(&unbatched);
    assert_eq!(expected_lines.len(), 3);

    // Final partial batches must behave exactly like full ones.
    for chunk_size in [1, 2] {
        let outcome = run_over_chunked(input, chunk_size);
        assert_eq!(outcome.summary, unbatched.summary);
        assert_eq!(report_lines(&outcome), expected_lines);
    }
}

#[test]
fn path_with_only_host_and_share_uses_the_sentinel_folder() {
    let outcome = run_over(
        r"ServerName|FullName|Length
SRV1|\\SRV1\ShareA\file.txt|500
",
    );

    let lines = report_lines(&outcome);
    assert_eq!(
        lines[1],
        r#""SRV1"|"\\SRV1\ShareA"|"Not Applicable"|"0.00"|"0"|"1""#
    );
}
