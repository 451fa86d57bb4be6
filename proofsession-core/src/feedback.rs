//! Turning model generations into checkable Lean and verifier output into
//! feedback for the next turn.

use crate::diagnostics::{byte_column, Diagnostic, Severity};
use crate::verifier::VerifierOutput;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const ERROR_MARKER: &str = "**Error**";

pub const PARSE_FAILURE_FEEDBACK: &str = "Parsing error. Cannot parse the code from output. Please try again and write the code in the format of ```lean4\n<code>\n```";

pub const TIMEOUT_FEEDBACK: &str =
    "The compilation timed out. There might be a heavy computation in the code or an endless loop.";

pub const SORRY_NOTE: &str = "The code contains 'sorry', which means the proof is incomplete.";

fn lean_block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```lean4?[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

/// Body of the last fenced Lean block (```` ```lean4 ```` or ```` ```lean ````).
pub fn extract_lean_code(generation: &str) -> Option<String> {
    let last = lean_block_regex()?.captures_iter(generation).last()?;
    let code = last.get(1)?.as_str().trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

/// Normalise `statement` so its proof is a bare `sorry`.
pub fn refine_by_sorry(statement: &str) -> String {
    let s = statement.trim_end();
    if let Some(p) = s.find(":= by") {
        return format!("{} sorry", &s[..p + ":= by".len()]);
    }
    if let Some(p) = s.find(":=") {
        return format!("{} by sorry", &s[..p + ":=".len()]);
    }
    format!("{s} := by sorry")
}

fn decl_name(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"(?m)^\s*(?:theorem|lemma)\s+([^\s:({\[⦃]+)").ok())
        .as_ref()?;
    Some(re.captures(text)?.get(1)?.as_str().to_string())
}

/// Offset just past the `:=` that ends the signature of `name` in `text`.
fn proof_start(text: &str, name: &str) -> Option<usize> {
    let pat = format!(r"(?m)^\s*(?:theorem|lemma)\s+{}(?:\s|:|\(|\{{|\[|$)", regex::escape(name));
    let re = Regex::new(&pat).ok()?;
    let m = re.find(text)?;
    let rel = text[m.start()..].find(":=")?;
    Some(m.start() + rel + ":=".len())
}

/// Keep the model's proof but force the original statement header.
///
/// Returns a text containing [`ERROR_MARKER`] when the declaration cannot be
/// matched up.
pub fn replace_statement_in_proof(statement: &str, code: &str) -> String {
    let Some(name) = decl_name(statement) else {
        return format!("{ERROR_MARKER}: no theorem or lemma declaration in the formal statement");
    };
    let Some(stmt_at) = proof_start(statement, &name) else {
        return format!("{ERROR_MARKER}: formal statement for `{name}` has no `:=`");
    };
    let Some(code_at) = proof_start(code, &name) else {
        return format!("{ERROR_MARKER}: could not find `{name}` in the generated code");
    };
    format!("{}{}", &statement[..stmt_at], &code[code_at..])
}

/// Errors of a run, each shown on its source line with `<error></error>`
/// around the reported span.
pub fn error_report(code: &str, diagnostics: &[Diagnostic]) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let mut out = Vec::new();
    for (k, d) in diagnostics.iter().filter(|d| d.severity == Severity::Error).enumerate() {
        let mut block = format!("Error {}:", k + 1);
        if d.line >= 1 && d.line <= lines.len() {
            let src = lines[d.line - 1];
            let col = byte_column(src, d.col);
            let end = match (d.end_line, d.end_col) {
                (Some(l), Some(c)) if l == d.line => byte_column(src, c).max(col),
                _ => src.len(),
            };
            block.push_str(&format!(
                "\nline {}: {}<error>{}</error>{}",
                d.line,
                &src[..col],
                &src[col..end],
                &src[end..]
            ));
        }
        block.push('\n');
        block.push_str(&d.text);
        out.push(block);
    }
    out.join("\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Proved,
    /// Checked without errors but still contains `sorry`.
    Incomplete,
    Failed,
    TimedOut,
    /// No Lean code could be recovered from the generation.
    Unparsed,
}

impl AttemptStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptStatus::Proved)
    }
}

pub fn classify(out: &VerifierOutput) -> AttemptStatus {
    if out.timed_out {
        return AttemptStatus::TimedOut;
    }
    let has_error = out
        .diagnostics
        .as_ref()
        .map(|ds| ds.iter().any(|d| d.severity == Severity::Error))
        .unwrap_or_else(|| out.response.contains("[error]") || out.response.contains("failed"));
    if has_error {
        return AttemptStatus::Failed;
    }
    static SORRY: OnceLock<Option<Regex>> = OnceLock::new();
    let mentions_sorry = SORRY
        .get_or_init(|| Regex::new(r"(?i)\bsorry\b").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(&out.response));
    if out.has_sorry || mentions_sorry {
        return AttemptStatus::Incomplete;
    }
    AttemptStatus::Proved
}

/// The error message handed to the model after a failed turn.
pub fn feedback_message(full_code: &str, out: &VerifierOutput, status: AttemptStatus) -> String {
    match status {
        AttemptStatus::Proved => String::new(),
        AttemptStatus::TimedOut => TIMEOUT_FEEDBACK.to_string(),
        AttemptStatus::Unparsed => PARSE_FAILURE_FEEDBACK.to_string(),
        AttemptStatus::Failed | AttemptStatus::Incomplete => {
            let mut msg =
                "We use <error></error> to signal the position of the error. \n".to_string();
            let report = out
                .diagnostics
                .as_ref()
                .map(|ds| error_report(full_code, ds))
                .unwrap_or_default();
            if report.is_empty() {
                msg.push_str(out.response.trim());
            } else {
                msg.push_str(&report);
            }
            if status == AttemptStatus::Incomplete || out.has_sorry {
                msg.push('\n');
                msg.push_str(SORRY_NOTE);
            }
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_last_lean_block() {
        let gen = "thinking...\n```lean4\ntheorem a : True := by sorry\n```\nbetter:\n```lean\ntheorem a : True := by trivial\n```";
        assert_eq!(
            extract_lean_code(gen).as_deref(),
            Some("theorem a : True := by trivial")
        );
        assert!(extract_lean_code("no code here").is_none());
        assert!(extract_lean_code("```python\nprint(1)\n```").is_none());
    }

    #[test]
    fn refine_by_sorry_shapes() {
        assert_eq!(refine_by_sorry("theorem a : True := by\n  trivial"), "theorem a : True := by sorry");
        assert_eq!(refine_by_sorry("theorem a : True := trivial"), "theorem a : True := by sorry");
        assert_eq!(refine_by_sorry("theorem a : True"), "theorem a : True := by sorry");
    }

    #[test]
    fn replace_statement_keeps_statement_and_generated_proof() {
        let stmt = "import Mathlib\n\n/-- informal -/\ntheorem add_zero' (n : Nat) : n + 0 = n := by sorry";
        let code = "theorem add_zero' (m : Nat) : m + 0 = m := by\n  simp";
        let full = replace_statement_in_proof(stmt, code);
        assert_eq!(
            full,
            "import Mathlib\n\n/-- informal -/\ntheorem add_zero' (n : Nat) : n + 0 = n := by\n  simp"
        );
    }

    #[test]
    fn replace_statement_reports_missing_decl() {
        let full = replace_statement_in_proof("theorem a : True := by sorry", "theorem b : True := by trivial");
        assert!(full.contains(ERROR_MARKER));
    }

    #[test]
    fn error_report_marks_column() {
        let code = "theorem a : True := by\n  exact foo";
        let d = Diagnostic {
            severity: Severity::Error,
            line: 2,
            col: 8,
            end_line: Some(2),
            end_col: Some(11),
            text: "unknown identifier 'foo'".to_string(),
        };
        let r = error_report(code, &[d]);
        assert_eq!(r, "Error 1:\nline 2:   exact <error>foo</error>\nunknown identifier 'foo'");
    }

    #[test]
    fn error_report_counts_columns_in_codepoints() {
        let code = "theorem a : True := by\n  exact ⟨foo, bar⟩";
        let d = Diagnostic {
            severity: Severity::Error,
            line: 2,
            col: 9,
            end_line: Some(2),
            end_col: Some(12),
            text: "unknown identifier 'foo'".to_string(),
        };
        let r = error_report(code, &[d]);
        assert!(r.contains("line 2:   exact ⟨<error>foo</error>, bar⟩"), "{r}");
    }

    #[test]
    fn classification() {
        let clean = VerifierOutput {
            diagnostics: Some(vec![]),
            ..VerifierOutput::default()
        };
        assert_eq!(classify(&clean), AttemptStatus::Proved);
        let sorry = VerifierOutput {
            has_sorry: true,
            diagnostics: Some(vec![]),
            ..VerifierOutput::default()
        };
        assert_eq!(classify(&sorry), AttemptStatus::Incomplete);
        assert_eq!(classify(&VerifierOutput::failure("boom")), AttemptStatus::Failed);
        assert_eq!(
            classify(&VerifierOutput::timeout(std::time::Duration::from_secs(1))),
            AttemptStatus::TimedOut
        );
    }
}
