#![allow(dead_code)]

use async_trait::async_trait;
use proofsession_core::diagnostics::{Diagnostic, Severity, INCOMPLETE_PROOF_MARKER};
use proofsession_core::{Verifier, VerifierOutput};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Rule = Box<dyn Fn(&str) -> VerifierOutput + Send + Sync>;

/// In-process verifier: answers with `rule` and remembers what it was sent.
pub struct ScriptedVerifier {
    rule: Rule,
    seen: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new(rule: impl Fn(&str) -> VerifierOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            rule: Box::new(rule),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn lean_like() -> Arc<Self> {
        Self::new(lean_like_rule)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, text: &str) -> VerifierOutput {
        self.seen.lock().unwrap().push(text.to_string());
        (self.rule)(text)
    }
}

pub fn diag(severity: Severity, line: usize, text: &str) -> Diagnostic {
    Diagnostic {
        severity,
        line,
        col: 0,
        end_line: None,
        end_col: None,
        text: text.to_string(),
    }
}

/// `bad_tactic` is an error, `spin_forever` times out, `sorry` is a warning.
pub fn lean_like_rule(text: &str) -> VerifierOutput {
    if text.contains("spin_forever") {
        return VerifierOutput::timeout(Duration::from_secs(1));
    }
    let mut diags = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.contains("bad_tactic") {
            diags.push(diag(Severity::Error, i + 1, "unknown tactic"));
        }
    }
    let has_sorry = text.contains("sorry");
    if has_sorry {
        diags.push(diag(Severity::Warning, 1, INCOMPLETE_PROOF_MARKER));
    }
    VerifierOutput {
        response: diags
            .iter()
            .map(|d| format!("{}: {}", d.severity, d.text))
            .collect::<Vec<_>>()
            .join("\n"),
        diagnostics: Some(diags),
        has_sorry,
        proof_state: None,
        timed_out: false,
    }
}
