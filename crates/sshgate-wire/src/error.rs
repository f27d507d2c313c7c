//! Error types for the sshgate-wire crate.
//!
//! Decoding is the only fallible operation; encoding into a growable buffer
//! cannot fail.

/// The error type for payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The input ended before a field could be read.
    #[error("truncated payload: field {field} needs {needed} bytes, {remaining} remaining")]
    Truncated {
        /// The field being read.
        field: &'static str,
        /// Bytes required to read the field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A string field did not contain valid UTF-8.
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// The offending field.
        field: &'static str,
    },

    /// Bytes were left over after the last field.
    #[error("{count} trailing bytes after payload")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// A terminal mode list was not terminated by `TTY_OP_END`.
    #[error("terminal mode list is not terminated")]
    UnterminatedModes,
}

impl DecodeError {
    /// Create a truncation error.
    #[must_use]
    pub const fn truncated(field: &'static str, needed: usize, remaining: usize) -> Self {
        Self::Truncated {
            field,
            needed,
            remaining,
        }
    }

    /// Check if this error was caused by short input.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Result type for decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;
