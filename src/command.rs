//! Helpers for running the external tools we depend on (`pdfinfo`,
//! `pdftocairo`, `tesseract`).

use std::{process::Output, sync::LazyLock};

use regex::Regex;

use crate::prelude::*;

/// Poppler prints most problems as `Error: ...` lines, even when it exits 0.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about broken xref tables in lots of scanner output, but
/// recovers fine.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of poppler output describe a real error?
pub fn is_poppler_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged at `debug` level. If
/// `is_error_line` is given, a successful exit status still counts as a
/// failure when any line of standard error matches it.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, output = %stdout, "Standard output from command");
    if !stderr.trim().is_empty() {
        debug!(command_name, output = %stderr, "Standard error from command");
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn is_poppler_error_line_works() {
        assert!(is_poppler_error_line("Syntax Error: something went wrong"));
        assert!(is_poppler_error_line("ERROR: something went wrong"));
        assert!(!is_poppler_error_line("Syntax Warning: something is odd"));
        assert!(!is_poppler_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[test]
    fn successful_command_passes() {
        let output = Command::new("true").output().unwrap();
        check_for_command_failure("true", &output, None).unwrap();
    }

    #[test]
    fn failing_command_reports_exit_code() {
        let output = Command::new("false").output().unwrap();
        let err = check_for_command_failure("false", &output, None).unwrap_err();
        assert!(err.to_string().contains("exit code 1"), "got: {err}");
    }

    #[test]
    fn error_lines_on_stderr_fail_successful_commands() {
        let output = Command::new("sh")
            .arg("-c")
            .arg("echo 'Syntax Error: broken page' >&2")
            .output()
            .unwrap();
        let err =
            check_for_command_failure("sh", &output, Some(&is_poppler_error_line))
                .unwrap_err();
        assert!(err.to_string().contains("broken page"), "got: {err}");
    }
}
