//! Interactive proof-editing sessions.
//!
//! A [`Session`] owns one proof document and everything derived from it:
//! compiler messages, open goals and the editable clause map. Every
//! mutation (`load`, `edit`, `add_structure`) ends with a full
//! re-verification, so callers never observe a half-updated state.
//!
//! Sessions share nothing but the verifier. Hand one session to each
//! concurrent task; [`SessionFactory`] does that bookkeeping.

use crate::clauses::{self, ClauseCategory, EditableClause};
use crate::diagnostics::{self, Goal, Message, Position, Severity};
use crate::error::SessionError;
use crate::lexer;
use crate::verifier::{Verifier, VerifierOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResult {
    /// No error-severity message (warnings do not count).
    pub success: bool,
    pub has_errors: bool,
    pub has_warnings: bool,
    /// The verifier reported an incomplete proof.
    pub has_open_goal: bool,
    pub timed_out: bool,
    pub messages: Vec<Message>,
    pub goals: Vec<Goal>,
    pub clause_ids: Vec<String>,
    pub compilation_id: u64,
    pub proof_state: Option<u64>,
    pub raw_response: String,
    pub session: SessionIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub clause_id: String,
    pub category: ClauseCategory,
    pub old_content: String,
    pub new_content: String,
    pub compilation: CompileResult,
    pub updated_document: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseSummary {
    pub id: String,
    pub summary: String,
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    pub current_document: String,
    pub messages: Vec<String>,
    pub goals: Vec<String>,
    pub clauses: Vec<ClauseSummary>,
    pub compilation_id: u64,
    pub session: SessionIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session: SessionIdentity,
    pub compilation_id: u64,
    pub document_bytes: usize,
    pub messages: usize,
    pub goals: usize,
    pub clauses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSuggestion {
    pub title: String,
    pub lines: Vec<String>,
}

/// Proof skeletons that fit [`Session::add_structure`].
pub fn structure_suggestions() -> Vec<StructureSuggestion> {
    let s = |title: &str, lines: &[&str]| StructureSuggestion {
        title: title.to_string(),
        lines: lines.iter().map(|l| l.to_string()).collect(),
    };
    vec![
        s(
            "implication (P → Q)",
            &["have h1 : P := by sorry", "have h2 : P → Q := by sorry", "exact h2 h1"],
        ),
        s(
            "conjunction (P ∧ Q)",
            &["have h1 : P := by sorry", "have h2 : Q := by sorry", "exact ⟨h1, h2⟩"],
        ),
        s(
            "lemmas first",
            &[
                "have lemma1 : _ := by sorry",
                "have lemma2 : _ := by sorry",
                "-- main proof steps",
                "exact lemma1",
            ],
        ),
    ]
}

fn decl_name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(theorem|lemma)(\s+)([^\s:({\[⦃]+)").ok())
        .as_ref()
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Hands out independent sessions over one shared verifier.
#[derive(Clone)]
pub struct SessionFactory {
    verifier: Arc<dyn Verifier>,
    instance_id: String,
    unique_names: bool,
}

impl SessionFactory {
    pub fn new(verifier: Arc<dyn Verifier>) -> Self {
        Self {
            verifier,
            instance_id: short_id(),
            unique_names: true,
        }
    }

    /// Whether sessions rename declarations before verification.
    pub fn with_unique_names(mut self, on: bool) -> Self {
        self.unique_names = on;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn session(&self) -> Session {
        let mut s = Session::new(Arc::clone(&self.verifier));
        s.identity.instance_id = self.instance_id.clone();
        s.unique_names = self.unique_names;
        s
    }
}

pub struct Session {
    verifier: Arc<dyn Verifier>,
    identity: SessionIdentity,
    unique_names: bool,
    document: String,
    compilation_counter: u64,
    messages: Vec<Message>,
    goals: Vec<Goal>,
    clauses: Vec<EditableClause>,
    proof_state: Option<u64>,
}

impl Session {
    pub fn new(verifier: Arc<dyn Verifier>) -> Self {
        Self {
            verifier,
            identity: SessionIdentity {
                session_id: short_id(),
                instance_id: String::new(),
            },
            unique_names: true,
            document: String::new(),
            compilation_counter: 0,
            messages: Vec::new(),
            goals: Vec::new(),
            clauses: Vec::new(),
            proof_state: None,
        }
    }

    pub fn with_unique_names(mut self, on: bool) -> Self {
        self.unique_names = on;
        self
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn clauses(&self) -> &[EditableClause] {
        &self.clauses
    }

    pub fn clause(&self, id: &str) -> Option<&EditableClause> {
        self.clauses.iter().find(|c| c.id == id)
    }

    pub fn compilation_counter(&self) -> u64 {
        self.compilation_counter
    }

    /// Replace the document and verify it.
    pub async fn load(&mut self, document: impl Into<String>) -> CompileResult {
        self.document = document.into();
        self.compile().await
    }

    /// Replace one clause and re-verify the whole document.
    ///
    /// Unknown (or stale) ids fail with [`SessionError::ClauseNotFound`] and
    /// leave the session untouched.
    pub async fn edit(&mut self, clause_id: &str, new_text: &str) -> Result<EditResult, SessionError> {
        let clause = self
            .clause(clause_id)
            .cloned()
            .ok_or_else(|| SessionError::ClauseNotFound(clause_id.to_string()))?;
        let updated = clauses::splice(&self.document, &clause, new_text)?;
        debug!(
            session = %self.identity.session_id,
            clause = %clause.id,
            category = %clause.category,
            "editing clause"
        );
        self.document = updated;
        let compilation = self.compile().await;
        Ok(EditResult {
            clause_id: clause.id,
            category: clause.category,
            old_content: clause.content,
            new_content: new_text.to_string(),
            compilation,
            updated_document: self.document.clone(),
        })
    }

    /// Expand the first `main_proof`/`sorry` clause into a multi-line proof.
    pub async fn add_structure<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<EditResult, SessionError> {
        let target = self
            .clauses
            .iter()
            .find(|c| c.id.starts_with("main_proof") || c.id.starts_with("sorry"))
            .cloned()
            .ok_or(SessionError::NoEditableTarget)?;
        let owner = self
            .document
            .split('\n')
            .nth(target.start.line)
            .unwrap_or("");
        let before = owner.get(..target.start.column).unwrap_or("");
        let line_indent: String = owner.chars().take_while(|c| c.is_whitespace()).collect();
        let inline = !before.trim().is_empty();
        let base = if inline {
            format!("{line_indent}  ")
        } else {
            line_indent
        };

        let rendered: Vec<String> = lines
            .iter()
            .map(|l| l.as_ref())
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                if l.starts_with(char::is_whitespace) {
                    format!("{base}{}", l.trim_end())
                } else {
                    format!("{base}{}", l.trim())
                }
            })
            .collect();

        // A term-mode `:= sorry` needs `by` before tactic lines.
        let opener = if before.trim_end().ends_with(":=") { "by" } else { "" };
        let new_text = if inline {
            format!("{opener}\n{}", rendered.join("\n"))
        } else {
            let joined = rendered.join("\n");
            joined.get(base.len()..).unwrap_or("").to_string()
        };
        self.edit(&target.id, &new_text).await
    }

    pub fn panel(&self) -> Panel {
        Panel {
            current_document: self.document.clone(),
            messages: self.messages.iter().map(|m| m.to_string()).collect(),
            goals: self.goals.iter().map(|g| g.to_string()).collect(),
            clauses: self
                .clauses
                .iter()
                .map(|c| ClauseSummary {
                    id: c.id.clone(),
                    summary: c.summary(),
                })
                .collect(),
            compilation_id: self.compilation_counter,
            session: self.identity.clone(),
        }
    }

    /// Advice in priority order: errors, open sorries, warnings, else done.
    pub fn suggest_next_actions(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.messages.iter().any(|m| m.severity == Severity::Error) {
            out.push("Fix compilation errors first".to_string());
        }
        let sorries: Vec<&str> = self
            .clauses
            .iter()
            .filter(|c| c.category == ClauseCategory::Sorry)
            .map(|c| c.id.as_str())
            .collect();
        if !sorries.is_empty() {
            out.push(format!("Work on sorry clauses: {}", sorries.join(", ")));
        }
        if self.messages.iter().any(|m| m.severity == Severity::Warning) {
            out.push("Address compiler warnings".to_string());
        }
        if out.is_empty() {
            out.push("Proof looks complete!".to_string());
        }
        out
    }

    /// First goal on `line` (the column is accepted for symmetry with editors).
    pub fn goal_at(&self, line: usize, _column: usize) -> Option<&Goal> {
        self.goals.iter().find(|g| g.position.line == line)
    }

    pub fn messages_at(&self, line: usize, _column: usize) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.covers_line(line)).collect()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session: self.identity.clone(),
            compilation_id: self.compilation_counter,
            document_bytes: self.document.len(),
            messages: self.messages.len(),
            goals: self.goals.len(),
            clauses: self.clauses.len(),
        }
    }

    fn name_suffix(&self) -> String {
        format!("_s{}", self.identity.session_id)
    }

    /// Rename `theorem`/`lemma` declarations, and every use of those names,
    /// so concurrent sessions sharing one Lean environment cannot clash. Line
    /// structure is preserved.
    fn unique_text(&self) -> String {
        if !self.unique_names {
            return self.document.clone();
        }
        let Some(decl) = decl_name_regex() else {
            return self.document.clone();
        };
        let mut names: Vec<&str> = decl
            .captures_iter(&self.document)
            .filter_map(|cap| cap.get(3).map(|m| m.as_str()))
            .collect();
        if names.is_empty() {
            return self.document.clone();
        }
        names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        names.dedup();
        let alternation: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
        let Ok(uses) = Regex::new(&alternation.join("|")) else {
            return self.document.clone();
        };

        let suffix = self.name_suffix();
        let doc = self.document.as_str();
        let mut out = String::with_capacity(doc.len() + names.len() * suffix.len());
        let mut last = 0usize;
        for m in uses.find_iter(doc) {
            let before = doc[..m.start()].chars().next_back();
            let after = doc[m.end()..].chars().next();
            if before.map_or(false, lexer::is_ident_char) || after.map_or(false, lexer::is_ident_char) {
                continue;
            }
            out.push_str(&doc[last..m.end()]);
            out.push_str(&suffix);
            last = m.end();
        }
        out.push_str(&doc[last..]);
        out
    }

    async fn compile(&mut self) -> CompileResult {
        self.compilation_counter += 1;
        let submitted = self.unique_text();
        debug!(
            session = %self.identity.session_id,
            compilation = self.compilation_counter,
            bytes = submitted.len(),
            "verifying document"
        );
        let out = self.verifier.verify(&submitted).await;
        if out.timed_out {
            warn!(session = %self.identity.session_id, "verification timed out");
        }

        let suffix = self.name_suffix();
        let submitted_lines: Vec<&str> = submitted.split('\n').collect();
        let unrename = |p: Position| {
            let column = submitted_lines
                .get(p.line)
                .and_then(|l| l.get(..p.column))
                .map_or(p.column, |prefix| prefix.replace(&suffix, "").len());
            Position::new(p.line, column)
        };
        self.messages = derive_messages(&out, &submitted)
            .into_iter()
            .map(|mut m| {
                if self.unique_names {
                    m.text = m.text.replace(&suffix, "");
                    m.start = unrename(m.start);
                    m.end = unrename(m.end);
                }
                m
            })
            .collect();
        self.proof_state = out.proof_state;
        self.goals = derive_goals(&self.document, &self.messages, out.proof_state);
        self.clauses = clauses::scan_clauses(&self.document);

        let has_errors = self.messages.iter().any(|m| m.severity == Severity::Error);
        let has_warnings = self.messages.iter().any(|m| m.severity == Severity::Warning);
        CompileResult {
            success: !has_errors,
            has_errors,
            has_warnings,
            has_open_goal: out.has_sorry || diagnostics::has_incomplete_marker(&out.response),
            timed_out: out.timed_out,
            messages: self.messages.clone(),
            goals: self.goals.clone(),
            clause_ids: self.clauses.iter().map(|c| c.id.clone()).collect(),
            compilation_id: self.compilation_counter,
            proof_state: self.proof_state,
            raw_response: out.response,
            session: self.identity.clone(),
        }
    }
}

/// Messages from one verifier output.
///
/// Structured diagnostics keep their positions, as byte columns of `source`
/// (the text that was verified); free text contributes its first block per
/// severity. An empty result gets an info note so callers can tell
/// "ran clean" from "never ran".
pub fn derive_messages(out: &VerifierOutput, source: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = match &out.diagnostics {
        Some(ds) => ds.iter().map(|d| d.to_message(source)).collect(),
        None => diagnostics::tagged_messages(&out.response),
    };
    if out.response.trim() == "Success" {
        messages.push(Message::new(Severity::Info, "Compilation successful"));
    } else if messages.is_empty() {
        messages.push(Message::new(Severity::Info, "Compilation completed"));
    }
    messages
}

/// One goal per placeholder in the document, then one per `unsolved goals` error.
pub fn derive_goals(document: &str, messages: &[Message], proof_state: Option<u64>) -> Vec<Goal> {
    let mut goals: Vec<Goal> = lexer::sorry_positions(document)
        .into_iter()
        .map(|(line, column)| Goal {
            text: format!("Goal at sorry on line {}", line + 1),
            position: Position::new(line, column),
            proof_state,
        })
        .collect();
    goals.extend(messages.iter().filter_map(|m| {
        diagnostics::unsolved_goal_text(m).map(|text| Goal {
            text,
            position: m.start,
            proof_state,
        })
    }));
    goals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostic;

    #[test]
    fn tagged_output_yields_first_block_messages() {
        let out = VerifierOutput::from_response("[error] bad\n[warning] meh");
        let ms = derive_messages(&out, "");
        assert_eq!(ms.len(), 2);
        assert_eq!(ms[0].severity, Severity::Error);
    }

    #[test]
    fn success_response_adds_info() {
        let ms = derive_messages(&VerifierOutput::from_response("Success"), "");
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].text, "Compilation successful");
        let ms = derive_messages(&VerifierOutput {
            diagnostics: Some(vec![]),
            ..VerifierOutput::default()
        }, "");
        assert_eq!(ms[0].text, "Compilation completed");
    }

    #[test]
    fn goals_from_sorries_and_unsolved_goals() {
        let doc = "theorem t : True ∧ True := by\n  constructor\n  sorry";
        let d = Diagnostic {
            severity: Severity::Error,
            line: 1,
            col: 29,
            end_line: None,
            end_col: None,
            text: "unsolved goals\ncase right\n⊢ True".to_string(),
        };
        let goals = derive_goals(doc, &[d.to_message(doc)], Some(7));
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].position, Position::new(2, 2));
        assert_eq!(goals[0].proof_state, Some(7));
        assert_eq!(goals[1].text, "case right\n⊢ True");
        // Lean's column 29 sits after the 3-byte `∧`
        assert_eq!(goals[1].position, Position::new(0, 31));
    }
}
