use crate::config::SessionConfig;
use crate::diagnostics::{self, Diagnostic, Severity};
use crate::lake;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// What a verifier reports about one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierOutput {
    /// Raw text as the prover printed it.
    pub response: String,
    /// Structured diagnostics, when the verifier could produce them.
    /// `None` means "free text only": the session falls back to tag extraction.
    pub diagnostics: Option<Vec<Diagnostic>>,
    pub has_sorry: bool,
    pub proof_state: Option<u64>,
    pub timed_out: bool,
}

impl VerifierOutput {
    pub fn from_response(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            has_sorry: diagnostics::has_incomplete_marker(&response),
            response,
            ..Self::default()
        }
    }

    /// A verification that could not run or finish.
    pub fn failure(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            response: text.clone(),
            diagnostics: Some(vec![Diagnostic::error(text)]),
            ..Self::default()
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(format!(
                "verification timed out after {}s",
                after.as_secs()
            ))
        }
    }

    /// Turn a raw Lean run into an output with structured diagnostics.
    pub fn from_lean_run(run: &lake::VerifyResult) -> Self {
        let response = match (run.stdout.trim().is_empty(), run.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", run.stdout.trim_end(), run.stderr.trim_end()),
            (false, true) => run.stdout.trim_end().to_string(),
            (true, false) => run.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        };
        let mut diags = diagnostics::parse_lean_diagnostics(&response);
        let has_error = diags.iter().any(|d| d.severity == Severity::Error);
        if !run.ok && !has_error {
            // Non-zero exit without a parseable error: keep it visible as one.
            let code = run
                .returncode
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string());
            let detail = if response.is_empty() {
                String::new()
            } else {
                format!(": {response}")
            };
            diags.push(Diagnostic::error(format!("lean exited with code {code}{detail}")));
        }
        Self {
            has_sorry: diagnostics::has_incomplete_marker(&response),
            response,
            diagnostics: Some(diags),
            proof_state: None,
            timed_out: false,
        }
    }
}

/// The external prover. Never fails: problems come back inside the output.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, text: &str) -> VerifierOutput;
}

/// Lean 4 via `lake env lean` (with a project root) or bare `lean`.
#[derive(Debug, Clone)]
pub struct LakeVerifier {
    repo_root: Option<PathBuf>,
    timeout: Duration,
    auto_build: bool,
}

impl LakeVerifier {
    pub fn new(repo_root: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_root,
            timeout,
            auto_build: true,
        }
    }

    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            repo_root: cfg.repo_root.clone(),
            timeout: cfg.timeout(),
            auto_build: cfg.auto_build,
        }
    }

    pub fn with_auto_build(mut self, on: bool) -> Self {
        self.auto_build = on;
        self
    }
}

#[async_trait]
impl Verifier for LakeVerifier {
    async fn verify(&self, text: &str) -> VerifierOutput {
        let run = match &self.repo_root {
            Some(root) => lake::verify_lean_text(root, text, self.timeout, self.auto_build).await,
            None => lake::verify_lean_text_standalone(text, self.timeout).await,
        };
        match run {
            Err(e) => {
                warn!(error = %e, "verifier could not run");
                VerifierOutput::failure(e)
            }
            Ok(r) if r.timeout => {
                warn!(timeout_s = self.timeout.as_secs(), cmd = ?r.cmd, "verifier timed out");
                VerifierOutput::timeout(self.timeout)
            }
            Ok(r) => {
                debug!(ok = r.ok, returncode = ?r.returncode, "verifier finished");
                VerifierOutput::from_lean_run(&r)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ok: bool, stdout: &str, stderr: &str) -> lake::VerifyResult {
        lake::VerifyResult {
            ok,
            timeout: false,
            returncode: Some(if ok { 0 } else { 1 }),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            cmd: vec![],
            cwd: String::new(),
        }
    }

    #[test]
    fn lean_run_with_sorry_warning() {
        let out = VerifierOutput::from_lean_run(&run(
            true,
            "/tmp/a.lean:1:8: warning: declaration uses 'sorry'\n",
            "",
        ));
        assert!(out.has_sorry);
        let ds = out.diagnostics.unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].severity, Severity::Warning);
    }

    #[test]
    fn failing_run_without_diagnostics_becomes_an_error() {
        let out = VerifierOutput::from_lean_run(&run(false, "", "Segmentation fault"));
        let ds = out.diagnostics.unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].severity, Severity::Error);
        assert!(ds[0].text.contains("code 1"));
        assert!(ds[0].text.contains("Segmentation fault"));
    }

    #[test]
    fn timeout_output_is_an_error() {
        let out = VerifierOutput::timeout(Duration::from_secs(5));
        assert!(out.timed_out);
        assert_eq!(out.diagnostics.unwrap()[0].severity, Severity::Error);
    }
}
