//! Error types for revdex.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`RevdexError`] enum. Errors fall into three families:
//!
//! - [`RevdexError::OrderingViolation`]: a writer received a term or document id
//!   that is not strictly increasing. Fatal for the current build step.
//! - [`RevdexError::CorruptIndex`]: malformed bytes were found while reading.
//!   Fatal for that read only; other open readers are unaffected.
//! - [`RevdexError::Io`]: propagated unmodified, never retried.
//!
//! Errors raised while building an index are wrapped in
//! [`RevdexError::Build`] naming the failing stage, except ordering
//! violations, which carry their stage themselves.
//!
//! Looking up an unknown term is not an error.
//!
//! # Examples
//!
//! ```
//! use revdex::error::{RevdexError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(RevdexError::invalid_argument("document ids start at 1"))
//! }
//!
//! assert!(example_operation().is_err());
//! ```

use std::fmt;
use std::io;

use thiserror::Error;

/// The stage of the build pipeline in which an error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Single-pass in-memory inversion of the token stream.
    Inversion,
    /// Multi-way merge of segments into the final dictionary.
    Merge,
    /// Direct use of the dictionary/posting writers.
    Write,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Inversion => "inversion",
            BuildStage::Merge => "merge",
            BuildStage::Write => "write",
        };
        f.write_str(name)
    }
}

/// The main error type for revdex operations.
#[derive(Error, Debug)]
pub enum RevdexError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A term or document id was not strictly increasing.
    #[error("Ordering violation during {stage}: {message}")]
    OrderingViolation {
        /// Where the violation was detected.
        stage: BuildStage,
        /// The offending term and/or document id.
        message: String,
    },

    /// Malformed bytes were encountered while reading index data.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// An argument was outside its valid domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The call is not valid in the current state of the receiver.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A 32-bit on-disk field would overflow.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread join errors
    #[error("Thread join error: {0}")]
    ThreadJoinError(String),

    /// An index build failed in `stage`.
    #[error("{stage} failed: {source}")]
    Build {
        stage: BuildStage,
        source: Box<RevdexError>,
    },
}

/// Result type alias for operations that may fail with RevdexError.
pub type Result<T> = std::result::Result<T, RevdexError>;

impl RevdexError {
    /// Create a new ordering violation error.
    pub fn ordering<S: Into<String>>(stage: BuildStage, msg: S) -> Self {
        RevdexError::OrderingViolation {
            stage,
            message: msg.into(),
        }
    }

    /// Create a new corrupt index error.
    pub fn corrupt_index<S: Into<String>>(msg: S) -> Self {
        RevdexError::CorruptIndex(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        RevdexError::InvalidArgument(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        RevdexError::InvalidOperation(msg.into())
    }

    /// Create a new resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        RevdexError::ResourceExhausted(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        RevdexError::Storage(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        RevdexError::Serialization(msg.into())
    }

    /// Attach the build stage that surfaced this error.
    ///
    /// Writers only know they were fed out-of-order input; the pipeline knows
    /// whether that happened while inverting or while merging. Ordering
    /// violations are re-tagged in place, every other error is wrapped in
    /// [`RevdexError::Build`]. An error that already names its build stage is
    /// returned unchanged.
    pub fn with_stage(self, stage: BuildStage) -> Self {
        match self {
            RevdexError::OrderingViolation { message, .. } => {
                RevdexError::OrderingViolation { stage, message }
            }
            error @ RevdexError::Build { .. } => error,
            other => RevdexError::Build {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any.
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            RevdexError::OrderingViolation { stage, .. } | RevdexError::Build { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// The underlying error, looking through any build stage wrapper.
    pub fn root(&self) -> &RevdexError {
        match self {
            RevdexError::Build { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error reports malformed index bytes.
    pub fn is_corruption(&self) -> bool {
        matches!(self.root(), RevdexError::CorruptIndex(_))
    }
}
