use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use camino::Utf8Path;
use tracing_error::SpanTrace;

/// Categorizes storage errors by their semantic meaning, independent of
/// the underlying storage backend implementation.
///
/// This enum helps callers understand what went wrong and how to respond,
/// without needing to inspect error messages or know backend-specific details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested path was not found.
    ///
    /// **Retryable:** No - the path doesn't exist.
    /// **Caller action:** Check the path, or handle as a missing resource.
    NotFound,

    /// A positional read or write was requested beyond the end of a file.
    ///
    /// **Retryable:** No - the request must be re-issued at a valid offset.
    /// **Caller action:** Query the current size and resume from there.
    InvalidOffset,

    /// The caller lacks permission to perform the requested operation.
    ///
    /// **Retryable:** No - unless credentials are updated.
    /// **Caller action:** Check authentication, authorization, or file permissions.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk, etc.).
    ///
    /// **Retryable:** Maybe - depends on whether the I/O issue is transient.
    /// **Caller action:** Consider retrying with backoff for transient failures.
    Io,

    /// The request was invalid (bad parameters, unknown driver, etc.).
    ///
    /// **Retryable:** No - the request itself is invalid.
    /// **Caller action:** Fix the request parameters.
    InvalidRequest,

    /// An unexpected or uncategorized error occurred.
    ///
    /// **Retryable:** Unknown - inspect the underlying error.
    /// **Caller action:** Check error details for specific guidance.
    Other,
}

impl StorageErrorKind {
    /// Returns whether this error kind typically indicates a retryable condition.
    ///
    /// This is advisory only: nothing in this workspace retries. A resilience
    /// layer wrapping a driver may use it to decide.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageErrorKind::Io)
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::InvalidOffset => write!(f, "invalid offset"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

impl From<std::io::ErrorKind> for StorageErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Captured backtrace for debugging.
    ///
    /// Note: Backtrace capture is controlled by RUST_BACKTRACE environment variable.
    backtrace: Backtrace,

    /// Captured span trace from tracing for async context.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// Storage error with context and diagnostic capabilities.
///
/// This error type provides:
/// - **Semantic categorization** via `StorageErrorKind`
/// - **Operation context** (path, engine, free-form context)
/// - **Error chain preservation** via `Box<dyn Error + Send + Sync>`
/// - **Backtrace capture** for debugging
/// - **Spantrace support** via `tracing_error::SpanTrace`
///
/// # Example
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// fn open_layer() -> Result<(), StorageError> {
///     let result = std::fs::File::open("missing.txt");
///
///     match result {
///         Err(err) => Err(StorageError::builder("filesystem", StorageErrorKind::NotFound, err)
///             .path("/blobs/sha256/ab/abcd/data")
///             .build()),
///         Ok(_) => Ok(()),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,

    /// The name of the storage engine that produced this error.
    engine: &'static str,

    /// The virtual path involved, if applicable.
    path: Option<String>,

    /// Additional context, usually the operation that failed.
    context: Option<String>,

    source: Box<dyn StdError + Send + Sync + 'static>,

    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create a new storage error with the minimum required information.
    ///
    /// For more control, use `StorageError::builder()`.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            path: None,
            context: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create a builder for constructing a storage error with full context.
    ///
    /// # Example
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// let error = StorageError::builder("inmemory", StorageErrorKind::NotFound,
    ///     std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"))
    ///     .path("/repositories/library/ubuntu/_layers")
    ///     .context("list")
    ///     .build();
    /// assert!(error.is_not_found());
    /// ```
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            path: None,
            context: None,
        }
    }

    /// Convert an I/O error, classifying it by its [`std::io::ErrorKind`].
    pub fn io(engine: &'static str, path: &Utf8Path, error: std::io::Error) -> Self {
        StorageError::builder(engine, error.kind().into(), error)
            .path(path.as_str())
            .build()
    }

    /// A `NotFound` error for `path`.
    pub fn not_found(engine: &'static str, path: &Utf8Path) -> Self {
        StorageError::builder(
            engine,
            StorageErrorKind::NotFound,
            format!("path not found: {path}"),
        )
        .path(path.as_str())
        .build()
    }

    /// An `InvalidOffset` error for a request at `offset` into a file of `size` bytes.
    pub fn invalid_offset(engine: &'static str, path: &Utf8Path, offset: u64, size: u64) -> Self {
        StorageError::builder(
            engine,
            StorageErrorKind::InvalidOffset,
            format!("offset {offset} is beyond the end of {path} ({size} bytes)"),
        )
        .path(path.as_str())
        .build()
    }

    /// Returns a boxed closure that creates a storage error from a downstream error.
    ///
    /// This is useful with `.map_err()` for simple error conversion.
    ///
    /// # Example
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// fn operation() -> Result<(), StorageError> {
    ///     std::fs::File::open("file.txt")
    ///         .map_err(StorageError::with("filesystem", StorageErrorKind::Io))?;
    ///     Ok(())
    /// }
    /// ```
    pub fn with<E>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Returns whether the path was not found.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// Returns the storage engine name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the virtual path, if available.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns additional context, if available.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns whether this error is likely retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    ///
    /// The span trace provides the tracing span context at the point where
    /// this error was created, showing the logical async call stack.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for constructing `StorageError` with optional context fields.
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    path: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the virtual path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the `StorageError`.
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            path: self.path,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let err = StorageError::io(
            "filesystem",
            Utf8Path::new("/a/b"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.path(), Some("/a/b"));

        let err = StorageError::io(
            "filesystem",
            Utf8Path::new("/a/b"),
            std::io::Error::other("disk on fire"),
        );
        assert_eq!(err.kind(), StorageErrorKind::Io);
        assert!(err.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = StorageError::invalid_offset("inmemory", Utf8Path::new("/x"), 10, 4);
        let message = err.to_string();
        assert!(message.contains("invalid offset"), "{message}");
        assert!(message.contains("(path: /x)"), "{message}");
        assert!(message.contains("10"), "{message}");
    }
}
