use thiserror::Error;

use crate::metadata::token::Token;

/// Builds an [`Error::StructuralConflict`] capturing the source location.
macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::StructuralConflict {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::StructuralConflict {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Non-strict runs degrade most relink failures into warnings, so the variants below surface
/// either because strict mode was requested or because the failure can never be tolerated
/// (for example an out-of-context generic parameter).
///
/// # Error Categories
///
/// ## Dependency Errors
/// - [`Error::UnresolvedDependency`] - A referenced assembly could not be located
///
/// ## Relink Errors
/// - [`Error::RelinkTargetNotFound`] - A mapped or implied relink target does not exist
/// - [`Error::RelinkFailed`] - Wraps any failure raised while rewriting a reference
///
/// ## Import Errors
/// - [`Error::UnsupportedReference`] - A descriptor shape the importer has no rule for
/// - [`Error::ContextNotSupported`] - A generic parameter used outside of a matching context
///
/// ## Structural Errors
/// - [`Error::StructuralConflict`] - Contract violations on the in-memory image model
/// - [`Error::TokenNotFound`] - A token lookup failed
/// - [`Error::RecursionLimit`] - Maximum recursion depth exceeded
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust,ignore
/// use dotpatch::{loader::MemorySource, Error, Patcher, PatcherConfig};
///
/// let mut patcher = Patcher::new(PatcherConfig::default().strict(true), Box::new(source));
/// patcher.read("/game/Game.dll")?;
/// match patcher.auto_patch() {
///     Ok(()) => println!("patched"),
///     Err(Error::RelinkFailed { reference, context, source }) => {
///         eprintln!("could not relink {reference} in {context}: {source}");
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A dependency of an image could not be located by any resolution step.
    ///
    /// Only raised when throw-on-missing or strict mode is enabled.
    #[error("Dependency {full_name} ({name}) of {requester} not found")]
    UnresolvedDependency {
        /// Name of the image that requested the dependency
        requester: String,
        /// Simple name of the missing dependency
        name: String,
        /// Full display name of the missing dependency
        full_name: String,
    },

    /// The target of a relink could not be found in the merged graph.
    #[error("Relink target not found: {target} (in {context})")]
    RelinkTargetNotFound {
        /// The key or name that was looked up
        target: String,
        /// The declaration in which the lookup happened
        context: String,
    },

    /// The importer or relinker encountered a reference shape it has no rule for.
    #[error("Unsupported reference: {0}")]
    UnsupportedReference(String),

    /// A generic parameter could not be bound against any enclosing generic context.
    ///
    /// This is a programming-contract violation and is never degraded.
    #[error("Generic parameter {parameter} has no matching context in {context}")]
    ContextNotSupported {
        /// The generic parameter being imported
        parameter: String,
        /// A description of the available context
        context: String,
    },

    /// A structural invariant of the image model was violated.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the conflict
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Structural conflict - {file}:{line}: {message}")]
    StructuralConflict {
        /// The message to be printed for the conflict
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Rewriting a reference failed; carries the reference and its context.
    #[error("Failed to relink {reference} (in {context}): {source}")]
    RelinkFailed {
        /// Display form of the reference being rewritten
        reference: String,
        /// The declaration that contains the reference
        context: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Failed to find a declaration by token.
    #[error("Failed to find token - {0}")]
    TokenNotFound(Token),

    /// Recursion limit reached.
    ///
    /// The associated value shows the recursion limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading or writing images.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Wraps this error into [`Error::RelinkFailed`] unless it already is one.
    #[must_use]
    pub fn relink_failed(self, reference: impl Into<String>, context: impl Into<String>) -> Self {
        match self {
            Error::RelinkFailed { .. } => self,
            other => Error::RelinkFailed {
                reference: reference.into(),
                context: context.into(),
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_error_macro() {
        let err = structural_error!("bad handle {}", 3);
        match err {
            Error::StructuralConflict { message, file, .. } => {
                assert_eq!(message, "bad handle 3");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn test_relink_failed_wraps_once() {
        let inner = Error::RelinkTargetNotFound {
            target: "Game.A::count".to_string(),
            context: "Game.A::Get".to_string(),
        };
        let wrapped = inner.relink_failed("Game.A::count", "Game.A::Get");
        let twice = wrapped.relink_failed("other", "other");
        match twice {
            Error::RelinkFailed {
                reference, source, ..
            } => {
                assert_eq!(reference, "Game.A::count");
                assert!(matches!(*source, Error::RelinkTargetNotFound { .. }));
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn test_display_unresolved_dependency() {
        let err = Error::UnresolvedDependency {
            requester: "Base".to_string(),
            name: "Lib".to_string(),
            full_name: "Lib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null".to_string(),
        };
        assert!(err.to_string().contains("of Base not found"));
    }
}
