//! Error types for the alignment pipeline.
//!
//! Every error carries a machine-readable code in the format `ALIGN-XXXX`:
//! - `ALIGN-1xxx`: geometry engine failures (propagated with engine diagnostics)
//! - `ALIGN-2xxx`: precondition failures (nothing to estimate from)
//! - `ALIGN-3xxx`: workspace failures (no writable location)
//! - `ALIGN-4xxx`: resilience failures (fallback chain exhausted, output rebind)
//!
//! Lock and name collisions are never errors: they are recovered locally by
//! [`crate::resilience`] and surface only as warnings.

use miette::Diagnostic;
use thiserror::Error;

use crate::engine::EngineError;

/// Result type alias for alignment operations.
pub type AlignResult<T> = Result<T, AlignError>;

/// Machine-readable error codes for alignment failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// ALIGN-1001: a geometry engine operation reported failure
    Engine = 1001,
    /// ALIGN-2001: no nearest distances available to estimate a tolerance
    EmptySample = 2001,
    /// ALIGN-3001: every candidate workspace rejected a write
    NoWritableWorkspace = 3001,
    /// ALIGN-4001: all tiers of an operation fallback chain failed
    FallbackExhausted = 4001,
    /// ALIGN-4002: rebinding a canonical output to a new layer failed
    ReplaceFailed = 4002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `ALIGN-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Engine => "ALIGN-1001",
            ErrorCode::EmptySample => "ALIGN-2001",
            ErrorCode::NoWritableWorkspace => "ALIGN-3001",
            ErrorCode::FallbackExhausted => "ALIGN-4001",
            ErrorCode::ReplaceFailed => "ALIGN-4002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can abort an alignment run.
#[derive(Debug, Error, Diagnostic)]
pub enum AlignError {
    /// The geometry engine reported a failure during a pipeline stage.
    #[error("geometry engine failed during {stage}")]
    #[diagnostic(
        code(align::engine::failed),
        help("Check the engine diagnostics in the error chain; the inputs may be corrupt or the workspace unavailable.")
    )]
    Engine {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    /// The measure stage produced no usable nearest distances.
    #[error("cannot estimate a snap tolerance: {details}")]
    #[diagnostic(
        code(align::tolerance::empty_sample),
        help("The moving layer must contain at least one vertex with a measurable distance to the reference boundary. Check that both layers have polygon features.")
    )]
    EmptySample { details: String },

    /// Every candidate workspace rejected the write.
    #[error("no writable workspace accepted a copy of {source_layer}: {}", .attempts.join("; "))]
    #[diagnostic(
        code(align::workspace::unwritable),
        help("Verify that at least one of the configured scratch or durable workspaces exists and is writable.")
    )]
    NoWritableWorkspace {
        source_layer: String,
        attempts: Vec<String>,
    },

    /// All tiers of a fallback chain failed.
    #[error("{operation}: all fallback strategies failed: {}", .attempts.join("; "))]
    #[diagnostic(
        code(align::fallback::exhausted),
        help("The last tier relies on contributor tagging in the overlay output; if the tagging field is missing the engine contract has changed.")
    )]
    FallbackExhausted {
        operation: &'static str,
        attempts: Vec<String>,
    },

    /// Rebinding the canonical output name to a freshly produced layer failed.
    ///
    /// The produced result always survives under `surviving`; no data is lost.
    #[error("failed to rebind output {output}: {details} (result preserved at {surviving})")]
    #[diagnostic(
        code(align::output::replace_failed),
        help("The stage result is intact at the preserved path. Copy it to the desired name once the workspace is available again.")
    )]
    ReplaceFailed {
        output: String,
        surviving: String,
        details: String,
    },
}

impl AlignError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            AlignError::Engine { .. } => ErrorCode::Engine,
            AlignError::EmptySample { .. } => ErrorCode::EmptySample,
            AlignError::NoWritableWorkspace { .. } => ErrorCode::NoWritableWorkspace,
            AlignError::FallbackExhausted { .. } => ErrorCode::FallbackExhausted,
            AlignError::ReplaceFailed { .. } => ErrorCode::ReplaceFailed,
        }
    }

    /// Returns a short recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            AlignError::Engine { .. } => {
                "Inspect the engine diagnostic text; re-run once the underlying dataset or workspace is available"
            }
            AlignError::EmptySample { .. } => {
                "Check that the moving layer has features and that both layers overlap spatially"
            }
            AlignError::NoWritableWorkspace { .. } => {
                "Free up or re-create one of the candidate workspaces, then re-run"
            }
            AlignError::FallbackExhausted { .. } => {
                "Run the erase manually against the staged outputs; the overlay contract may have changed"
            }
            AlignError::ReplaceFailed { .. } => {
                "Copy the preserved result to the canonical name once the lock clears"
            }
        }
    }

    // Constructor helpers for common error patterns

    /// Wrap an engine failure with the pipeline stage it occurred in.
    pub fn engine(stage: &'static str, source: EngineError) -> Self {
        AlignError::Engine { stage, source }
    }

    /// Create an EmptySample error.
    pub fn empty_sample(details: impl Into<String>) -> Self {
        AlignError::EmptySample {
            details: details.into(),
        }
    }

    /// Create a NoWritableWorkspace error from per-candidate rejection reasons.
    pub fn no_writable_workspace(source_layer: impl Into<String>, attempts: Vec<String>) -> Self {
        AlignError::NoWritableWorkspace {
            source_layer: source_layer.into(),
            attempts,
        }
    }

    /// Create a FallbackExhausted error carrying the attempt log.
    pub fn fallback_exhausted(operation: &'static str, attempts: Vec<String>) -> Self {
        AlignError::FallbackExhausted {
            operation,
            attempts,
        }
    }

    /// Create a ReplaceFailed error naming the surviving dataset.
    pub fn replace_failed(
        output: impl Into<String>,
        surviving: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        AlignError::ReplaceFailed {
            output: output.into(),
            surviving: surviving.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AlignError::empty_sample("no distances");
        assert_eq!(err.code(), ErrorCode::EmptySample);
        assert_eq!(err.code().as_str(), "ALIGN-2001");
    }

    #[test]
    fn test_no_writable_workspace_lists_attempts() {
        let err = AlignError::no_writable_workspace(
            "in/a",
            vec!["memory: rejected".into(), "scratch: rejected".into()],
        );
        let display = format!("{}", err);
        assert!(display.contains("memory: rejected"));
        assert!(display.contains("scratch: rejected"));
    }

    #[test]
    fn test_replace_failed_names_surviving_dataset() {
        let err = AlignError::replace_failed("out/a", "out/a_swap_1f2e3d", "copy failed");
        let display = format!("{}", err);
        assert!(display.contains("out/a_swap_1f2e3d"));
        assert_eq!(err.code(), ErrorCode::ReplaceFailed);
    }

    #[test]
    fn test_recovery_suggestions_nonempty() {
        let err = AlignError::fallback_exhausted("erase", vec!["erase: boom".into()]);
        assert!(!err.recovery_suggestion().is_empty());
    }
}
