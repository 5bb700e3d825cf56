#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping for command previews, input guards, process execution.

pub mod exec;
pub mod id;

pub use exec::{ExecOutput, ExecRequest, ExecService};

/// Reject strings containing newline, carriage return, or NUL before embedding into a shell command.
///
/// Keep error text stable (tests/UX depend on it).
pub fn reject_newlines(s: &str, what: &str) -> Result<(), String> {
    if s.contains('\n') || s.contains('\r') || s.contains('\0') {
        Err(format!("refusing to use {what}: contains newline"))
    } else {
        Ok(())
    }
}

/// Reject single quotes in values that end up inside a single-quoted `echo` payload.
pub fn reject_single_quotes(s: &str, what: &str) -> Result<(), String> {
    if s.contains('\'') {
        Err(format!("refusing to use {what}: contains a single quote"))
    } else {
        Ok(())
    }
}

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}
