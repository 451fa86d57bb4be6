use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Lean's marker for a declaration that still contains a placeholder.
pub const INCOMPLETE_PROOF_MARKER: &str = "declaration uses 'sorry'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "info" | "information" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 0-based line and byte column into the session's document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A compiler message as the session exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    pub start: Position,
    pub end: Position,
}

impl Message {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            start: Position::default(),
            end: Position::default(),
        }
    }

    pub fn covers_line(&self, line: usize) -> bool {
        self.start.line <= line && line <= self.end.line
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} at line {}",
            self.severity,
            self.text,
            self.start.line + 1
        )
    }
}

/// An open proof obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    pub position: Position,
    pub proof_state: Option<u64>,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.text.chars().take(100).collect();
        write!(f, "Goal at line {}: {}", self.position.line + 1, head)?;
        if head.len() < self.text.len() {
            f.write_str("...")?;
        }
        Ok(())
    }
}

/// One diagnostic as printed by the Lean CLI.
///
/// Lean prints `file.lean:LINE:COL: severity: text`, with 1-based lines and
/// 0-based columns; `-DprintMessageEndPos=true` adds `-ENDLINE:ENDCOL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// 1-based; 0 when Lean gave no position.
    pub line: usize,
    pub col: usize,
    pub end_line: Option<usize>,
    pub end_col: Option<usize>,
    pub text: String,
}

impl Diagnostic {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            line: 0,
            col: 0,
            end_line: None,
            end_col: None,
            text: text.into(),
        }
    }

    /// Message with Lean's codepoint columns turned into byte columns of `source`.
    pub fn to_message(&self, source: &str) -> Message {
        let lines: Vec<&str> = source.split('\n').collect();
        let at = |line: usize, col: usize| {
            let line = line.saturating_sub(1);
            let col = lines.get(line).map_or(col, |src| byte_column(src, col));
            Position::new(line, col)
        };
        let start = at(self.line, self.col);
        let end = match (self.end_line, self.end_col) {
            (Some(l), Some(c)) => at(l, c),
            _ => start,
        };
        Message {
            severity: self.severity,
            text: self.text.clone(),
            start,
            end,
        }
    }
}

/// Byte offset of codepoint column `col` in `line`, clamped to the line end.
pub fn byte_column(line: &str, col: usize) -> usize {
    line.char_indices().nth(col).map_or(line.len(), |(i, _)| i)
}

fn header_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:[^\n]*?\.lean|<stdin>):(\d+):(\d+)(?:-(\d+):(\d+))?:\s+(error|warning|info|information)(?:\([^)]*\))?:\s?(.*)$",
        )
        .ok()
    })
    .as_ref()
}

fn bare_header_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(error|warning):\s?(.*)$").ok())
        .as_ref()
}

/// Parse every Lean diagnostic in `output`.
///
/// Lines that do not start a new diagnostic are continuation lines of the
/// previous one (Lean prints goal listings that way).
pub fn parse_lean_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut out: Vec<Diagnostic> = Vec::new();
    let (Some(header), Some(bare)) = (header_regex(), bare_header_regex()) else {
        return out;
    };
    let mut open = false;
    for raw in output.lines() {
        let line = raw.trim_end_matches('\r');
        if let Some(cap) = header.captures(line) {
            let num = |i: usize| cap.get(i).and_then(|m| m.as_str().parse::<usize>().ok());
            let Some(severity) = cap.get(5).and_then(|m| Severity::parse(m.as_str())) else {
                continue;
            };
            out.push(Diagnostic {
                severity,
                line: num(1).unwrap_or(0),
                col: num(2).unwrap_or(0),
                end_line: num(3),
                end_col: num(4),
                text: cap.get(6).map(|m| m.as_str()).unwrap_or("").to_string(),
            });
            open = true;
            continue;
        }
        if let Some(cap) = bare.captures(line) {
            let Some(severity) = cap.get(1).and_then(|m| Severity::parse(m.as_str())) else {
                continue;
            };
            out.push(Diagnostic {
                severity,
                line: 0,
                col: 0,
                end_line: None,
                end_col: None,
                text: cap.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
            });
            open = true;
            continue;
        }
        if open {
            if let Some(last) = out.last_mut() {
                if !last.text.is_empty() {
                    last.text.push('\n');
                }
                last.text.push_str(line);
            }
        }
    }
    for d in &mut out {
        let n = d.text.trim_end().len();
        d.text.truncate(n);
    }
    out
}

fn tagged_block_regex(severity: Severity) -> Option<&'static Regex> {
    static ERROR: OnceLock<Option<Regex>> = OnceLock::new();
    static WARNING: OnceLock<Option<Regex>> = OnceLock::new();
    static INFO: OnceLock<Option<Regex>> = OnceLock::new();
    let cell = match severity {
        Severity::Error => &ERROR,
        Severity::Warning => &WARNING,
        Severity::Info => &INFO,
    };
    cell.get_or_init(|| {
        let tag = format!("[{}]", severity.as_str());
        Regex::new(&format!(r"(?s){}\s*(.*?)(?:\n\n|\n\[|\z)", regex::escape(&tag))).ok()
    })
    .as_ref()
}

/// First `[severity] ...` block of free-text verifier output.
///
/// A block runs until a blank line, the next `[` tag, or the end of input.
pub fn first_tagged_block(response: &str, severity: Severity) -> Option<String> {
    let tag = format!("[{}]", severity.as_str());
    if !response.contains(&tag) {
        return None;
    }
    let re = tagged_block_regex(severity)?;
    let cap = re.captures(response)?;
    Some(cap.get(1)?.as_str().trim().to_string())
}

/// Messages from free-text output: the first block of each severity.
pub fn tagged_messages(response: &str) -> Vec<Message> {
    [Severity::Error, Severity::Warning, Severity::Info]
        .into_iter()
        .filter_map(|sev| first_tagged_block(response, sev).map(|text| Message::new(sev, text)))
        .collect()
}

/// Goal listing of an `unsolved goals` error, if this message is one.
pub fn unsolved_goal_text(message: &Message) -> Option<String> {
    if message.severity != Severity::Error {
        return None;
    }
    let rest = message.text.trim_start().strip_prefix("unsolved goals")?;
    let goal = rest.trim();
    if goal.is_empty() {
        None
    } else {
        Some(goal.to_string())
    }
}

pub fn has_incomplete_marker(response: &str) -> bool {
    response.contains(INCOMPLETE_PROOF_MARKER)
}
