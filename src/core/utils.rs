use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Canonical form used for every output comparison: CRLF to LF, outer whitespace stripped
pub fn normalize_output(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

pub fn outputs_match(expected: &str, actual: &str) -> bool {
    normalize_output(expected) == normalize_output(actual)
}

/// Whole-script comparison: every line stripped on both sides
pub fn lines_match_stripped(expected: &str, actual: &str) -> bool {
    let strip = |s: &str| -> Vec<String> {
        normalize_output(s)
            .lines()
            .map(|line| line.trim().to_string())
            .collect()
    };
    strip(expected) == strip(actual)
}

/// 1-based number of the first line that differs after normalisation
pub fn first_difference_line(expected: &str, actual: &str) -> Option<usize> {
    let expected = normalize_output(expected);
    let actual = normalize_output(actual);
    let mut expected_lines = expected.lines();
    let mut actual_lines = actual.lines();
    let mut line_no = 1;
    loop {
        match (expected_lines.next(), actual_lines.next()) {
            (None, None) => return None,
            (Some(e), Some(a)) if e == a => line_no += 1,
            _ => return Some(line_no),
        }
    }
}

/// Diagnostics attached to an output mismatch verdict
pub fn mismatch_details(expected: &str, actual: &str) -> Map<String, Value> {
    let expected = normalize_output(expected);
    let actual = normalize_output(actual);
    let mut details = Map::new();
    details.insert(
        "edit_distance".to_string(),
        triple_accel::levenshtein(expected.as_bytes(), actual.as_bytes()).into(),
    );
    if let Some(line) = first_difference_line(&expected, &actual) {
        details.insert("first_difference_line".to_string(), line.into());
    }
    details.insert("expected".to_string(), expected.into());
    details.insert("actual".to_string(), actual.into());
    details
}

/// Last `max` characters of `text`, prefixed with an ellipsis when cut
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("...{}", tail)
}

/// Short SHA-256 fingerprint identifying a submission in logs
pub fn fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..12].to_string()
}
