//! Editable clauses: named spans of proof text and the splice rules that
//! replace them.
//!
//! Clauses come from one left-to-right scan of the document. Ids are only
//! meaningful for the document they were scanned from; any edit invalidates
//! all of them.

use crate::diagnostics::Position;
use crate::error::SessionError;
use crate::lexer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseCategory {
    MainProof,
    Have,
    Sorry,
    TacticBlock,
    Tactic,
    ProofLine,
}

impl ClauseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseCategory::MainProof => "main_proof",
            ClauseCategory::Have => "have",
            ClauseCategory::Sorry => "sorry",
            ClauseCategory::TacticBlock => "tactic_block",
            ClauseCategory::Tactic => "tactic",
            ClauseCategory::ProofLine => "proof_line",
        }
    }
}

impl fmt::Display for ClauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One editable span. `start`/`end` share a line; columns are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableClause {
    pub id: String,
    pub category: ClauseCategory,
    pub start: Position,
    pub end: Position,
    pub content: String,
}

impl EditableClause {
    /// `category: content`, as shown in the panel.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.category, self.content)
    }

    /// Byte range of the clause inside `doc`, if it still fits there.
    pub fn byte_range(&self, doc: &str) -> Option<Range<usize>> {
        let mut offset = 0usize;
        for (i, line) in doc.split('\n').enumerate() {
            if i == self.start.line {
                let (s, e) = (self.start.column, self.end.column);
                if s <= e && e <= line.len() && line.is_char_boundary(s) && line.is_char_boundary(e) {
                    return Some(offset + s..offset + e);
                }
                return None;
            }
            offset += line.len() + 1;
        }
        None
    }
}

impl fmt::Display for EditableClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.content.chars().take(50).collect();
        write!(f, "{} [{}]: {}", self.category, self.id, head)?;
        if head.len() < self.content.len() {
            f.write_str("...")?;
        }
        Ok(())
    }
}

const DECL_KEYWORDS: &[&str] = &["theorem", "lemma", "example"];

const TOP_LEVEL_COMMANDS: &[&str] = &[
    "namespace", "end", "section", "open", "variable", "universe", "import", "def", "abbrev",
    "instance", "structure", "class", "inductive", "set_option", "noncomputable", "@[", "#check",
    "#eval", "#print", "#reduce",
];

const TACTICS: &[&str] = &[
    "intro", "intros", "exact", "apply", "rw", "rwa", "simp", "simp_all", "trivial", "rfl",
    "constructor", "cases", "rcases", "obtain", "induction", "unfold", "left", "right", "split",
    "exfalso", "contradiction", "assumption", "linarith", "nlinarith", "omega", "norm_num", "ring",
    "ring_nf", "field_simp", "aesop", "decide", "use", "refine", "specialize", "show", "calc",
    "exists", "existsi", "by_contra", "by_cases", "push_neg", "positivity", "tauto",
];

fn first_word(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| c.is_whitespace() || matches!(c, '[' | ';' | '(' | '⟨' | ','))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

fn starts_decl(stripped: &str) -> bool {
    let head = stripped
        .strip_prefix("private ")
        .or_else(|| stripped.strip_prefix("protected "))
        .unwrap_or(stripped);
    DECL_KEYWORDS.iter().any(|kw| {
        head.strip_prefix(kw)
            .map(|rest| rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == ':'))
            .unwrap_or(false)
    })
}

fn is_top_level_command(stripped: &str) -> bool {
    TOP_LEVEL_COMMANDS
        .iter()
        .any(|kw| stripped.starts_with(kw) && (kw.ends_with('[') || first_word(stripped) == *kw))
}

fn is_tactic_line(stripped: &str) -> bool {
    TACTICS.contains(&first_word(stripped))
}

fn have_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*have\s+([^\s:]+)\s*:.*?:=\s*by\b(.*)$").ok())
        .as_ref()
}

/// `(start, end)` of the trimmed text in `line[from..to]`, as byte offsets of `line`.
fn trimmed_span(line: &str, from: usize, to: usize) -> (usize, usize) {
    let seg = &line[from..to];
    let lead = seg.len() - seg.trim_start().len();
    let body = seg.trim();
    if body.is_empty() {
        let at = from + seg.trim_end().len();
        return (at, at);
    }
    (from + lead, from + lead + body.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Outside,
    Header,
    Proof,
}

struct Builder {
    out: Vec<EditableClause>,
    taken: HashSet<String>,
    counter: usize,
}

impl Builder {
    fn push(&mut self, id: String, category: ClauseCategory, line_idx: usize, line: &str, span: (usize, usize)) {
        self.taken.insert(id.clone());
        self.out.push(EditableClause {
            id,
            category,
            start: Position::new(line_idx, span.0),
            end: Position::new(line_idx, span.1),
            content: line[span.0..span.1].to_string(),
        });
        self.counter += 1;
    }

    fn numbered(&mut self, category: ClauseCategory, line_idx: usize, line: &str, span: (usize, usize)) {
        let id = format!("{}_{}", category, self.counter);
        self.push(id, category, line_idx, line, span);
    }

    fn sorries(&mut self, line_idx: usize, line: &str, cols: &[usize]) {
        for &c in cols {
            self.numbered(ClauseCategory::Sorry, line_idx, line, (c, c + "sorry".len()));
        }
    }
}

/// Scan `doc` into its editable clauses, in document order.
pub fn scan_clauses(doc: &str) -> Vec<EditableClause> {
    let mut b = Builder {
        out: Vec::new(),
        taken: HashSet::new(),
        counter: 0,
    };
    let mut ctx = Context::Outside;
    let mut depth = 0usize;

    for (i, line) in doc.split('\n').enumerate() {
        let scan = lexer::scan_line(line, depth);
        depth = scan.block_depth;
        if !scan.has_code {
            continue;
        }
        let code = &line[..scan.code_end];
        let stripped = code.trim();
        let indent = code.len() - code.trim_start().len();

        if starts_decl(stripped) {
            ctx = Context::Header;
        } else if ctx == Context::Proof && indent == 0 && is_top_level_command(stripped) {
            ctx = Context::Outside;
            continue;
        }

        match ctx {
            Context::Outside => {}
            Context::Header => {
                if let Some(p) = code.find(":= by") {
                    let after = p + ":= by".len();
                    let tail: Vec<usize> = scan.sorries.iter().copied().filter(|&c| c >= after).collect();
                    if !tail.is_empty() {
                        b.sorries(i, line, &tail);
                    } else {
                        let span = trimmed_span(line, after, code.len());
                        if span.0 < span.1 {
                            b.numbered(ClauseCategory::MainProof, i, line, span);
                        }
                    }
                    ctx = Context::Proof;
                } else if code.contains(":=") {
                    // Term-mode proof: only placeholders are editable.
                    b.sorries(i, line, &scan.sorries);
                    ctx = Context::Outside;
                }
            }
            Context::Proof => {
                if let Some(cap) = have_regex().and_then(|re| re.captures(code)) {
                    if let (Some(name), Some(body)) = (cap.get(1), cap.get(2)) {
                        let base = format!("have_{}", name.as_str());
                        let mut id = base.clone();
                        let mut n = b.counter;
                        while b.taken.contains(&id) {
                            id = format!("{base}_{n}");
                            n += 1;
                        }
                        let span = trimmed_span(line, body.start(), code.len());
                        b.push(id, ClauseCategory::Have, i, line, span);
                        continue;
                    }
                }
                if !scan.sorries.is_empty() {
                    b.sorries(i, line, &scan.sorries);
                } else if let Some(rest) = stripped.strip_prefix("by ") {
                    let from = indent + (stripped.len() - rest.len());
                    let span = trimmed_span(line, from, code.len());
                    b.numbered(ClauseCategory::TacticBlock, i, line, span);
                } else {
                    let category = if is_tactic_line(stripped) {
                        ClauseCategory::Tactic
                    } else {
                        ClauseCategory::ProofLine
                    };
                    let span = trimmed_span(line, indent, line.len());
                    b.numbered(category, i, line, span);
                }
            }
        }
    }

    b.out
}

/// Replace `clause`'s span in `doc` with `new_text`.
///
/// The span is the category's replacement target: the placeholder for
/// `sorry`, everything after the proof-introducer for `have`, `main_proof`
/// and `tactic_block`, the whole line minus indentation for `tactic` and
/// `proof_line`. A `new_text` starting with a newline moves the replacement
/// onto fresh lines and drops trailing whitespace before it.
pub fn splice(doc: &str, clause: &EditableClause, new_text: &str) -> Result<String, SessionError> {
    let out_of_range = || SessionError::SpanOutOfRange {
        id: clause.id.clone(),
        line: clause.start.line,
        start: clause.start.column,
        end: clause.end.column,
    };
    if clause.start.line != clause.end.line {
        return Err(out_of_range());
    }
    let mut lines: Vec<&str> = doc.split('\n').collect();
    let line = *lines.get(clause.start.line).ok_or_else(out_of_range)?;
    let (s, e) = (clause.start.column, clause.end.column);
    if s > e || e > line.len() || !line.is_char_boundary(s) || !line.is_char_boundary(e) {
        return Err(out_of_range());
    }

    let mut prefix = &line[..s];
    let suffix = &line[e..];
    if new_text.starts_with('\n') {
        prefix = prefix.trim_end();
    }
    let glue = if s == e
        && !new_text.is_empty()
        && !new_text.starts_with(char::is_whitespace)
        && prefix.ends_with(|c: char| !c.is_whitespace())
    {
        " "
    } else {
        ""
    };
    let new_line = format!("{prefix}{glue}{new_text}{suffix}");
    lines[clause.start.line] = &new_line;
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_id<'a>(cs: &'a [EditableClause], id: &str) -> &'a EditableClause {
        cs.iter().find(|c| c.id == id).expect("clause")
    }

    #[test]
    fn inline_sorry_on_theorem_line_is_a_sorry_clause() {
        let doc = "theorem t (A B : Prop) : A ∧ B → B ∧ A := by sorry";
        let cs = scan_clauses(doc);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].id, "sorry_0");
        assert_eq!(cs[0].category, ClauseCategory::Sorry);
        assert_eq!(cs[0].content, "sorry");
        assert_eq!(&doc[cs[0].byte_range(doc).unwrap()], "sorry");
    }

    #[test]
    fn inline_tactics_on_theorem_line_are_main_proof() {
        let doc = "theorem t : True := by trivial";
        let cs = scan_clauses(doc);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].id, "main_proof_0");
        assert_eq!(cs[0].content, "trivial");
    }

    #[test]
    fn classifies_proof_lines_in_scan_order() {
        let doc = "theorem demo (P Q : Prop) (hp : P) (hq : Q) : P ∧ Q := by\n  have h1 : P := by exact hp\n  have h2 : Q := by sorry\n  -- now combine\n  constructor\n  · exact h1\n  by exact h2\n  sorry";
        let cs = scan_clauses(doc);
        let ids: Vec<&str> = cs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["have_h1", "have_h2", "tactic_2", "proof_line_3", "tactic_block_4", "sorry_5"]
        );
        assert_eq!(by_id(&cs, "have_h1").content, "exact hp");
        assert_eq!(by_id(&cs, "have_h2").content, "sorry");
        assert_eq!(by_id(&cs, "proof_line_3").content, "· exact h1");
        assert_eq!(by_id(&cs, "tactic_block_4").content, "exact h2");
    }

    #[test]
    fn multi_line_header_opens_proof_on_by_line() {
        let doc = "theorem long_sig\n    (n : Nat) :\n    n + 0 = n := by\n  simp";
        let cs = scan_clauses(doc);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].category, ClauseCategory::Tactic);
        assert_eq!(cs[0].start.line, 3);
    }

    #[test]
    fn ignores_comments_and_closes_on_top_level_commands() {
        let doc = "/- sorry -/\ntheorem a : True := by\n  trivial\nend Foo\ndef x : Nat := sorry";
        let cs = scan_clauses(doc);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].id, "tactic_0");
    }

    #[test]
    fn duplicate_have_names_get_suffixed() {
        let doc = "example : True := by\n  have h : True := by trivial\n  have h : True := by trivial\n  exact h";
        let cs = scan_clauses(doc);
        assert_eq!(cs[0].id, "have_h");
        assert_eq!(cs[1].id, "have_h_1");
        assert_eq!(cs[2].id, "tactic_2");
    }

    #[test]
    fn suffixed_have_ids_skip_names_already_in_use() {
        let doc = "example : True := by\n  have h_2 : True := by trivial\n  have h : True := by trivial\n  have h : True := by trivial\n  exact h";
        let cs = scan_clauses(doc);
        let ids: Vec<&str> = cs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["have_h_2", "have_h", "have_h_3", "tactic_3"]);
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn every_span_fits_the_document() {
        let doc = "theorem ü (x : Nat) : x = x := by\n  have hé : x = x := by\n  rfl  \n  exact ⟨sorry, sorry⟩";
        for c in scan_clauses(doc) {
            let r = c.byte_range(doc).expect("in range");
            assert_eq!(&doc[r], c.content);
        }
    }

    #[test]
    fn splice_is_identity_for_current_content() {
        let doc = "theorem d : True := by\n  have h : True := by  trivial  \n  exact h\n";
        for c in scan_clauses(doc) {
            assert_eq!(splice(doc, &c, &c.content).unwrap(), doc, "clause {}", c.id);
        }
    }

    #[test]
    fn splice_rules_per_category() {
        let doc = "theorem d (P : Prop) (hp : P) : P := by\n  have h : P := by sorry\n    exact hp -- old\n  sorry";
        let cs = scan_clauses(doc);

        let have = by_id(&cs, "have_h");
        let out = splice(doc, have, "exact hp").unwrap();
        assert!(out.contains("  have h : P := by exact hp\n"));

        let tactic = by_id(&cs, "tactic_1");
        let out = splice(doc, tactic, "assumption").unwrap();
        assert!(out.contains("\n    assumption\n"));

        let sorry = by_id(&cs, "sorry_2");
        let out = splice(doc, sorry, "exact h").unwrap();
        assert!(out.ends_with("\n  exact h"));
    }

    #[test]
    fn empty_have_body_gets_a_separating_space() {
        let doc = "example : True := by\n  have h : True := by\n  exact h";
        let cs = scan_clauses(doc);
        let have = by_id(&cs, "have_h");
        assert_eq!(have.content, "");
        let out = splice(doc, have, "trivial").unwrap();
        assert!(out.contains("have h : True := by trivial\n"));
    }

    #[test]
    fn splice_rejects_stale_spans() {
        let doc = "theorem t : True := by sorry";
        let mut c = scan_clauses(doc).remove(0);
        c.start.line = 4;
        c.end.line = 4;
        assert!(matches!(
            splice(doc, &c, "trivial"),
            Err(SessionError::SpanOutOfRange { .. })
        ));
    }
}
