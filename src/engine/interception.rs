//! Print-type interception and sentinel trailers
//!
//! The child writes `\n<sentinel>\n<json>\n` after all user output. The
//! sentinel is random per run and never reaches the submission's argv,
//! globals or request data; a trailer is only trusted when the sentinel
//! occurs exactly once.

use rand::Rng;
use thiserror::Error;

use super::backend::PrintRecord;

/// Wrapper executed instead of the submission when interception is on.
/// argv: wrapper, submission path, sentinel file. The sentinel file is
/// removed before the submission starts.
pub const INTERCEPT_WRAPPER: &str = r#"import builtins
import json
import os
import sys


def _grader_reporter(sentinel_path):
    with open(sentinel_path, encoding="utf-8") as handle:
        sentinel = handle.read().strip()
    os.remove(sentinel_path)
    out = sys.__stdout__
    dumps = json.dumps

    def report(records):
        out.write("\n" + sentinel + "\n" + dumps(records) + "\n")
        out.flush()

    return report


def _grader_run(report):
    path = sys.argv[1]
    sys.argv = [path]
    records = []
    original_print = builtins.print

    def recording_print(*args, **kwargs):
        records.append({"type": type(args[0]).__name__ if args else None})
        return original_print(*args, **kwargs)

    with open(path, encoding="utf-8") as handle:
        code = compile(handle.read(), path, "exec")
    builtins.print = recording_print
    try:
        exec(code, {"__name__": "__main__", "__builtins__": builtins})
    finally:
        builtins.print = original_print
        try:
            sys.stdout.flush()
        except Exception:
            pass
        report(records)


_grader_run(_grader_reporter(sys.argv.pop(2)))
"#;

/// Note appended to stderr when an intercepted run has no usable trailer
pub const MISSING_TRAILER_NOTE: &str = "[grader] print metadata unavailable";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrailerError {
    #[error("trailer not found")]
    Missing,
    #[error("sentinel appeared {0} times")]
    Repeated(usize),
    #[error("process exited with {0:?} after writing the trailer")]
    UncleanExit(Option<i32>),
    #[error("malformed trailer: {0}")]
    Malformed(String),
}

pub fn new_sentinel() -> String {
    let token: u128 = rand::thread_rng().gen();
    format!("__GRADER_TRAILER_{:032x}__", token)
}

/// Split captured stdout at the sentinel line.
/// Returns the user part and the raw trailer text.
pub fn split_trailer<'a>(stdout: &'a str, sentinel: &str) -> Result<(&'a str, &'a str), TrailerError> {
    let marker = format!("\n{}\n", sentinel);
    let at = stdout.find(&marker).ok_or(TrailerError::Missing)?;
    let occurrences = stdout.matches(sentinel).count();
    if occurrences != 1 {
        return Err(TrailerError::Repeated(occurrences));
    }
    Ok((&stdout[..at], &stdout[at + marker.len()..]))
}

/// Stdout with everything from the first sentinel on removed
pub fn strip_trailer<'a>(stdout: &'a str, sentinel: &str) -> &'a str {
    let marker = format!("\n{}\n", sentinel);
    match stdout.find(&marker).or_else(|| stdout.find(sentinel)) {
        Some(at) => &stdout[..at],
        None => stdout,
    }
}

/// Parse the print-type trailer of an intercepted run.
/// Metadata is only trusted from a run that exited cleanly.
pub fn parse_print_trailer(
    stdout: &str,
    sentinel: &str,
    exit_code: Option<i32>,
) -> Result<(String, Vec<PrintRecord>), TrailerError> {
    let (user, trailer) = split_trailer(stdout, sentinel)?;
    if exit_code != Some(0) {
        return Err(TrailerError::UncleanExit(exit_code));
    }
    let line = trailer.lines().next().unwrap_or_default();
    let records = serde_json::from_str(line).map_err(|e| TrailerError::Malformed(e.to_string()))?;
    Ok((user.to_string(), records))
}
