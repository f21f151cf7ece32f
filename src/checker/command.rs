//! External checker process.
//!
//! Writes the draft to a temporary `.py` file, runs the configured command on
//! it from the project root, and parses pylint JSON or `path:line:col:` text.

use super::{CheckerError, StaticChecker};
use crate::config::CheckerConfig;
use crate::pipeline::model::{Diagnostic, Severity, ValidationReport};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

/// Pylint sets this exit bit on command-line usage errors.
const PYLINT_USAGE_ERROR: i32 = 32;

/// Runs an external static checker.
pub struct CommandChecker {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    python_path: Vec<PathBuf>,
    timeout_seconds: u64,
    max_output_bytes: usize,
}

/// One entry of pylint's `--output-format=json`.
#[derive(Debug, Deserialize)]
struct PylintMessage {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default)]
    symbol: String,
    #[serde(rename = "message-id", default)]
    message_id: String,
}

/// Captured output of a finished checker process.
struct CommandResult {
    status: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandChecker {
    /// Checker run from `project_root`, with `python_path` exported as `PYTHONPATH`.
    pub fn new(config: &CheckerConfig, project_root: &Path, python_path: Vec<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: project_root.to_path_buf(),
            python_path,
            timeout_seconds: config.timeout_seconds,
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn python_path_env(&self) -> Option<OsString> {
        let existing = std::env::var_os("PYTHONPATH");
        let paths = self
            .python_path
            .iter()
            .cloned()
            .chain(existing.iter().flat_map(std::env::split_paths));
        std::env::join_paths(paths).ok()
    }

    async fn run_command_with_timeout(&self, artifact: &Path) -> Result<CommandResult, CheckerError> {
        let mut command = tokio::process::Command::new(&self.command);
        command
            .args(&self.args)
            .arg(artifact)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(python_path) = self.python_path_env() {
            command.env("PYTHONPATH", python_path);
        }

        let child = command.spawn().map_err(|e| {
            CheckerError::Crashed(format!("Failed to spawn `{}`: {}", self.command, e))
        })?;

        let timeout = Duration::from_secs(self.timeout_seconds);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandResult {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(CheckerError::Crashed(format!(
                "Command execution error: {}",
                e
            ))),
            Err(_) => Err(CheckerError::Crashed(format!(
                "`{}` timed out after {} seconds",
                self.command, self.timeout_seconds
            ))),
        }
    }
}

#[async_trait]
impl StaticChecker for CommandChecker {
    async fn check(&self, source: &str) -> Result<ValidationReport, CheckerError> {
        let mut file = tempfile::Builder::new()
            .prefix("pbtgen_")
            .suffix(".py")
            .tempfile()
            .map_err(|e| CheckerError::Crashed(format!("Failed to create temp file: {}", e)))?;
        file.write_all(source.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| CheckerError::Crashed(format!("Failed to write temp file: {}", e)))?;

        let result = self.run_command_with_timeout(file.path()).await?;
        let diagnostics = parse_output(&self.command, &result)?;

        tracing::debug!(
            "`{}` exited with {:?}: {} diagnostic(s)",
            self.command,
            result.status,
            diagnostics.len()
        );

        let combined = format!("{}{}", result.stdout, result.stderr);
        let mut report = ValidationReport::new(diagnostics);
        report.raw_output = Some(truncate_output(&combined, self.max_output_bytes));
        Ok(report)
    }
}

fn parse_output(tool: &str, result: &CommandResult) -> Result<Vec<Diagnostic>, CheckerError> {
    let Some(code) = result.status else {
        return Err(CheckerError::Crashed(format!("`{}` was terminated by a signal", tool)));
    };
    if code & PYLINT_USAGE_ERROR != 0 {
        return Err(CheckerError::Crashed(format!(
            "`{}` reported a usage error (exit {}): {}",
            tool,
            code,
            first_lines(&result.stderr, 3)
        )));
    }

    let stdout = result.stdout.trim();
    if stdout.starts_with('[') {
        let messages: Vec<PylintMessage> = serde_json::from_str(stdout).map_err(|e| {
            CheckerError::Crashed(format!("`{}` produced unparseable JSON: {}", tool, e))
        })?;
        return Ok(messages
            .into_iter()
            .map(|m| pylint_diagnostic(tool, m))
            .collect());
    }

    let diagnostics: Vec<Diagnostic> = stdout
        .lines()
        .filter_map(|line| parse_text_line(tool, line))
        .collect();

    if code != 0 && diagnostics.is_empty() {
        return Err(CheckerError::Crashed(format!(
            "`{}` exited with {} and no parseable diagnostics: {}",
            tool,
            code,
            first_lines(&format!("{}{}", result.stdout, result.stderr), 3)
        )));
    }
    Ok(diagnostics)
}

fn pylint_diagnostic(tool: &str, message: PylintMessage) -> Diagnostic {
    let code = if message.message_id.is_empty() {
        message.symbol.clone()
    } else {
        message.message_id.clone()
    };
    let text = if message.symbol.is_empty() {
        message.message
    } else {
        format!("{} ({})", message.message, message.symbol)
    };
    let diagnostic = Diagnostic::new(severity_for(&message.kind), &code, text, tool);
    match message.line {
        Some(line) => diagnostic.at(line, message.column.unwrap_or(0)),
        None => diagnostic,
    }
}

/// Parse `path:line:col: CODE: message` or `path:line: severity: message`.
fn parse_text_line(tool: &str, line: &str) -> Option<Diagnostic> {
    let mut parts = line.splitn(4, ':');
    let _path = parts.next()?;
    let line_no: usize = parts.next()?.trim().parse().ok()?;
    let third = parts.next()?;
    let (column, rest) = match third.trim().parse::<usize>() {
        Ok(column) => (column, parts.next()?.to_string()),
        Err(_) => match parts.next() {
            Some(tail) => (0, format!("{}:{}", third, tail)),
            None => (0, third.to_string()),
        },
    };

    let rest = rest.trim();
    let (code, message) = rest
        .split_once(':')
        .map(|(code, message)| (code.trim(), message.trim()))
        .filter(|(code, _)| !code.is_empty() && !code.contains(' '))
        .unwrap_or(("", rest));
    if message.is_empty() {
        return None;
    }

    let code = if code.is_empty() { "checker" } else { code };
    Some(Diagnostic::new(severity_for(code), code, message, tool).at(line_no, column))
}

/// Map a pylint message type, a severity word, or a message code to a severity.
fn severity_for(kind: &str) -> Severity {
    let lower = kind.to_ascii_lowercase();
    match lower.as_str() {
        "error" | "fatal" | "syntax-error" => return Severity::Error,
        "warning" => return Severity::Warning,
        "convention" | "refactor" | "info" | "note" | "information" => return Severity::Info,
        _ => {}
    }
    match kind.chars().next() {
        Some('E') | Some('F') => Severity::Error,
        Some('W') => Severity::Warning,
        Some('C') | Some('R') | Some('I') => Severity::Info,
        _ => Severity::Warning,
    }
}

fn first_lines(text: &str, count: usize) -> String {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .take(count)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut end = max_bytes;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &output[..end])
}
