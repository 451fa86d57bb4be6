use thiserror::Error;

/// Failures of session operations.
///
/// Verifier problems are never reported here: they become error messages in
/// the session state so the session stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("clause `{0}` not found (clause ids are rebuilt after every load/edit)")]
    ClauseNotFound(String),
    #[error("no main_proof or sorry clause to add structure to")]
    NoEditableTarget,
    #[error("clause `{id}` span {line}:{start}..{end} does not fit the current document")]
    SpanOutOfRange {
        id: String,
        line: usize,
        start: usize,
        end: usize,
    },
}
