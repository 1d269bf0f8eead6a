//! Centralized error handling for the MAT5 codec.
//!
//! Every decode and encode path reports failures through [`MatError`] instead of
//! panicking. The library enforces this with `#![deny(clippy::panic)]` and
//! `#![deny(clippy::unwrap_used)]`.
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`MatError::Io`]): source or sink failures, including a
//!   premature end of stream.
//! - **Format Errors** ([`MatError::Format`]): bad identifiers, unexpected or
//!   unknown tag types, declared-vs-consumed length mismatches, malformed endian
//!   markers and missing reference targets.
//! - **Range Errors** ([`MatError::Range`]): a value that does not fit its
//!   physical storage type, or an element whose encoded size exceeds the 32-bit
//!   tag ceiling.
//! - **Unsupported** ([`MatError::Unsupported`]): valid but unhandled layouts.
//! - **Compression Errors** ([`MatError::Compression`]): deflate stream failures.
//! - **Internal Errors** ([`MatError::Internal`]): logic errors (poisoned locks,
//!   missing pipeline results).
//!
//! ## Usage
//!
//! ```rust
//! use mat5::{Mat5, MatError};
//!
//! match Mat5::open("missing.mat") {
//!     Ok(file) => println!("{} entries", file.len()),
//!     Err(MatError::Io(e)) => eprintln!("I/O error: {e}"),
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for MAT5 operations.
pub type Result<T> = std::result::Result<T, MatError>;

/// The master error enum covering all failure domains of the codec.
///
/// The type is `Clone` so that a failure captured on a worker thread can be
/// handed back to the aggregating read or write call. I/O errors are wrapped in
/// an `Arc` for that reason.
#[derive(Debug, Clone)]
pub enum MatError {
    /// Low-level I/O failure of the underlying source or sink.
    ///
    /// Truncated input surfaces here as `io::ErrorKind::UnexpectedEof`.
    Io(Arc<io::Error>),

    /// The bytes do not conform to the MAT5 layout.
    ///
    /// The message names the offending tag or position.
    Format(String),

    /// A value does not fit its physical numeric storage, or an element's
    /// encoded size exceeds what a 32-bit tag can describe.
    Range(String),

    /// A structurally valid layout that this codec does not handle.
    Unsupported(String),

    /// Deflate stream failure while inflating or compressing an entry.
    Compression(String),

    /// Logic error inside the codec (poisoned lock, lost pipeline slot).
    ///
    /// Should not occur in production.
    Internal(String),
}

impl MatError {
    /// Shorthand for a [`MatError::Format`] with a formatted message.
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Shorthand for a [`MatError::Range`] with a formatted message.
    pub(crate) fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    /// Returns true if the error was caused by running out of input.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl fmt::Display for MatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::Range(s) => write!(f, "Range Error: {s}"),
            Self::Unsupported(s) => write!(f, "Unsupported: {s}"),
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for MatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MatError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
