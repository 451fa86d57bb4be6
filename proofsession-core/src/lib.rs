//! `proofsession-core`: interactive Lean 4 proof editing.
//!
//! Scope:
//! - a [`Session`] holds one proof document, re-verifies it after every
//!   change, and exposes its editable clauses by stable ids
//! - the [`Verifier`] seam hides how Lean is run (`lake env lean` by default)
//! - a small generate/verify/refine loop ([`prover`]) for whole-proof attempts
//!
//! Output discipline:
//! - every result type is `serde`-friendly; the CLI prints JSON to stdout
//! - logs go through `tracing` (stderr in the CLI)
//!
//! Entrypoints:
//! - the CLI binary lives in `proofsession-core/src/bin/proofsession.rs`
//!
//! Environment: see [`config`] and [`llm`].

pub mod clauses;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod feedback;
pub mod lake;
pub mod lexer;
pub mod llm;
pub mod prover;
pub mod session;
pub mod verifier;

pub use clauses::{scan_clauses, ClauseCategory, EditableClause};
pub use config::SessionConfig;
pub use diagnostics::{Diagnostic, Goal, Message, Position, Severity};
pub use error::SessionError;
pub use prover::{ChatTurn, ProofGenerator, ProverConfig, ProverLoop};
pub use session::{
    CompileResult, EditResult, Panel, Session, SessionFactory, SessionIdentity, SessionInfo,
};
pub use verifier::{LakeVerifier, Verifier, VerifierOutput};
