//! Whole-proof generation with verifier feedback.
//!
//! One attempt is a short conversation: the model proposes a proof, the
//! verifier checks it, and (with `refinement` on) the errors go back to the
//! model as the next user turn. `pass_at_n` repeats attempts from scratch.

use crate::feedback::{
    self, classify, extract_lean_code, feedback_message, refine_by_sorry, replace_statement_in_proof,
    AttemptStatus, ERROR_MARKER,
};
use crate::verifier::Verifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Produces the next assistant message for a conversation.
#[async_trait]
pub trait ProofGenerator: Send + Sync {
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, String>;
}

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Complete the following Lean 4 code:\n\n```lean4\n{problem}\n```\n\nBefore producing the Lean 4 code to formally prove the given theorem, provide a detailed proof plan outlining the main proof steps and strategies.\nThe plan should highlight key ideas, intermediate lemmas, and proof structures that will guide the construction of the final formal proof.";

pub const DEFAULT_REFINE_TEMPLATE: &str = "The proof is not correct. Following is the compilation error message:\n\n{error_message}\n\nPlease fix the proof and write the complete corrected Lean 4 code in a ```lean4 block.";

pub const MAX_N_PASS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    /// Turns per attempt (only the first is used without `refinement`).
    pub max_turns: usize,
    pub n_pass: usize,
    /// Feed verifier errors back to the model.
    pub refinement: bool,
    /// Replace parsed assistant turns with just their Lean code.
    pub remove_cot: bool,
    /// Keep only the latest parsed assistant turn. Requires `remove_cot`.
    pub delete_wrong_turns: bool,
    pub system_prompt: Option<String>,
    /// `{problem}` is replaced by the normalised statement.
    pub prompt_template: String,
    /// `{error_message}` is replaced by the feedback text.
    pub refine_template: String,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            max_turns: 2,
            n_pass: 1,
            refinement: false,
            remove_cot: false,
            delete_wrong_turns: false,
            system_prompt: None,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            refine_template: DEFAULT_REFINE_TEMPLATE.to_string(),
        }
    }
}

impl ProverConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_turns == 0 {
            return Err("max_turns must be at least 1".to_string());
        }
        if self.n_pass == 0 || self.n_pass > MAX_N_PASS {
            return Err(format!("n_pass must be in 1..={MAX_N_PASS}, got {}", self.n_pass));
        }
        if self.delete_wrong_turns && !self.remove_cot {
            return Err("remove_cot is required when delete_wrong_turns is enabled".to_string());
        }
        if !self.prompt_template.contains("{problem}") {
            return Err("prompt_template must contain {problem}".to_string());
        }
        if self.refinement && !self.refine_template.contains("{error_message}") {
            return Err("refine_template must contain {error_message}".to_string());
        }
        Ok(())
    }
}

/// One generate/verify round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub turn: usize,
    /// Lean code as extracted from the generation.
    pub code: Option<String>,
    /// The statement header spliced onto the generated proof.
    pub full_code: String,
    pub status: AttemptStatus,
    pub response: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofAttempt {
    pub success: bool,
    pub statement: String,
    pub records: Vec<AttemptRecord>,
    /// The conversation as sent to the model (after `remove_cot` rewriting).
    pub transcript: Vec<ChatTurn>,
    /// The conversation with every raw generation.
    pub full_transcript: Vec<ChatTurn>,
}

impl ProofAttempt {
    /// The last checked code, if any turn produced one.
    pub fn final_code(&self) -> Option<&str> {
        self.records
            .iter()
            .rev()
            .find(|r| r.code.is_some())
            .map(|r| r.full_code.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassAtN {
    pub success: bool,
    /// Attempts actually run.
    pub n_pass: usize,
    pub last: ProofAttempt,
}

pub struct ProverLoop {
    generator: Arc<dyn ProofGenerator>,
    verifier: Arc<dyn Verifier>,
    config: ProverConfig,
}

impl ProverLoop {
    pub fn new(
        generator: Arc<dyn ProofGenerator>,
        verifier: Arc<dyn Verifier>,
        config: ProverConfig,
    ) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            generator,
            verifier,
            config,
        })
    }

    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    fn initial_turns(&self, statement: &str) -> Vec<ChatTurn> {
        let mut turns = Vec::new();
        if let Some(sys) = self.config.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            turns.push(ChatTurn::system(sys));
        }
        turns.push(ChatTurn::user(
            self.config.prompt_template.replace("{problem}", statement.trim()),
        ));
        turns
    }

    /// One multi-turn attempt. Only generator failures are errors; failed
    /// proofs come back with `success == false`.
    pub async fn attempt(&self, formal_statement: &str) -> Result<ProofAttempt, String> {
        let statement = refine_by_sorry(formal_statement.trim());
        let base = self.initial_turns(&statement);
        let mut turns = base.clone();
        let mut full = base.clone();
        let mut records = Vec::new();

        for turn in 0..self.config.max_turns {
            let generation = self.generator.generate(&turns).await?;
            let code = extract_lean_code(&generation);
            let full_code = code
                .as_deref()
                .map(|c| replace_statement_in_proof(&statement, c))
                .unwrap_or_default();
            let parsed = code.is_some() && !full_code.contains(ERROR_MARKER);

            if self.config.remove_cot && parsed {
                if self.config.delete_wrong_turns {
                    turns = base.clone();
                }
                turns.push(ChatTurn::assistant(format!("```lean4\n{}\n```", full_code.trim())));
            } else {
                turns.push(ChatTurn::assistant(generation.clone()));
            }
            full.push(ChatTurn::assistant(generation));

            let (status, response, error_message) = if code.is_none() {
                (
                    AttemptStatus::Unparsed,
                    String::new(),
                    feedback::PARSE_FAILURE_FEEDBACK.to_string(),
                )
            } else if !parsed {
                (AttemptStatus::Failed, full_code.clone(), full_code.clone())
            } else {
                let out = self.verifier.verify(&full_code).await;
                let status = classify(&out);
                let msg = feedback_message(&full_code, &out, status);
                (status, out.response, msg)
            };
            debug!(turn, ?status, "prover turn checked");

            let fb = (!status.is_success())
                .then(|| self.config.refine_template.replace("{error_message}", &error_message));
            records.push(AttemptRecord {
                turn,
                code,
                full_code,
                status,
                response,
                feedback: fb.clone(),
            });

            if status.is_success() {
                break;
            }
            match fb {
                Some(text) if self.config.refinement && turn + 1 < self.config.max_turns => {
                    turns.push(ChatTurn::user(text.clone()));
                    full.push(ChatTurn::user(text));
                }
                _ => break,
            }
        }

        let success = records.last().map(|r| r.status.is_success()).unwrap_or(false);
        Ok(ProofAttempt {
            success,
            statement,
            records,
            transcript: turns,
            full_transcript: full,
        })
    }

    /// Independent attempts until one succeeds or `n_pass` are used up.
    pub async fn pass_at_n(&self, formal_statement: &str) -> Result<PassAtN, String> {
        let mut last = None;
        let mut used = 0;
        for i in 0..self.config.n_pass {
            used = i + 1;
            let attempt = self.attempt(formal_statement).await?;
            let done = attempt.success;
            last = Some(attempt);
            if done {
                break;
            }
        }
        let last = last.ok_or_else(|| "no attempt was run".to_string())?;
        info!(success = last.success, n_pass = used, "pass@n finished");
        Ok(PassAtN {
            success: last.success,
            n_pass: used,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(ProverConfig::default().validate().is_ok());
        let bad = ProverConfig {
            delete_wrong_turns: true,
            ..ProverConfig::default()
        };
        assert!(bad.validate().unwrap_err().contains("remove_cot"));
        let bad = ProverConfig {
            n_pass: 33,
            ..ProverConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = ProverConfig {
            max_turns: 0,
            ..ProverConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn chat_turns_serialize_like_openai_messages() {
        let v = serde_json::to_value(ChatTurn::user("hi")).unwrap();
        assert_eq!(v, serde_json::json!({"role": "user", "content": "hi"}));
    }
}
