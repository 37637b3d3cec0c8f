// This module defines the error type for dlcall using the thiserror crate. CallError covers
// every recoverable failure of the engine: unknown type names and malformed signatures,
// registry and loader name resolution, argument count and value conversion problems,
// classification capacity limits, failures reported by the invocation layer, loader errors,
// and use of a closed or busy library. Each variant carries the context needed to reproduce
// the problem (routine name, argument index, expected vs actual kind). Faults raised inside
// the native callee itself are not represented here: they terminate the process. The module
// also provides CallResult<T> as a convenience alias for Result<T, CallError>.

//! Error types for the call engine.

use thiserror::Error;

/// Main error type for defining and calling native routines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("unknown type {name:?}")]
    UnknownType { name: String },

    #[error("invalid signature {signature:?}: {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("routine {name:?} not found")]
    RoutineNotFound { name: String },

    #[error("symbol {name:?} not found: {reason}")]
    SymbolNotFound { name: String, reason: String },

    #[error("too few arguments for {routine}: expected {expected}, got {actual}")]
    TooFewArguments {
        routine: String,
        expected: usize,
        actual: usize,
    },

    #[error("{}argument {index}: cannot convert {actual} to {expected}: {reason}", routine_prefix(.routine))]
    ConversionError {
        routine: Option<String>,
        index: usize,
        expected: String,
        actual: String,
        reason: String,
    },

    #[error("{}argument {index}: no encoding for value of kind {kind}", routine_prefix(.routine))]
    UnsupportedValueKind {
        routine: Option<String>,
        index: usize,
        kind: String,
    },

    #[error("kind {kind} cannot be passed by value")]
    UnsupportedKind { kind: String },

    #[error("maximum number of stack arguments reached ({limit})")]
    TooManyStackArguments { limit: usize },

    #[error("too many arguments: {actual} (maximum {limit})")]
    TooManyArguments { limit: usize, actual: usize },

    #[error("call to {routine} failed: {message}")]
    NativeCallFailure { routine: String, message: String },

    #[error("{operation} failed: {message}")]
    LoaderError {
        operation: &'static str,
        message: String,
    },

    #[error("library is closed")]
    LibraryClosed,

    #[error("library has {in_flight} call(s) in flight")]
    LibraryBusy { in_flight: usize },
}

fn routine_prefix(routine: &Option<String>) -> String {
    match routine {
        Some(name) => format!("{name}: "),
        None => String::new(),
    }
}

impl CallError {
    /// Attach the routine name to argument-level errors.
    pub fn in_routine(self, name: &str) -> Self {
        match self {
            CallError::ConversionError {
                routine: None,
                index,
                expected,
                actual,
                reason,
            } => CallError::ConversionError {
                routine: Some(name.to_string()),
                index,
                expected,
                actual,
                reason,
            },
            CallError::UnsupportedValueKind {
                routine: None,
                index,
                kind,
            } => CallError::UnsupportedValueKind {
                routine: Some(name.to_string()),
                index,
                kind,
            },
            CallError::NativeCallFailure { routine, message } if routine.is_empty() => {
                CallError::NativeCallFailure {
                    routine: name.to_string(),
                    message,
                }
            }
            other => other,
        }
    }
}

/// Result type alias for engine operations.
pub type CallResult<T> = Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_routine_attaches_name() {
        let err = CallError::ConversionError {
            routine: None,
            index: 1,
            expected: "int32".into(),
            actual: "list".into(),
            reason: "aggregate".into(),
        }
        .in_routine("size");

        assert_eq!(
            err.to_string(),
            "size: argument 1: cannot convert list to int32: aggregate"
        );
    }

    #[test]
    fn test_in_routine_keeps_other_errors() {
        let err = CallError::LibraryClosed.in_routine("strlen");
        assert_eq!(err, CallError::LibraryClosed);
    }
}
