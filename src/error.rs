//! Engine error types

use thiserror::Error;

/// Errors surfaced by the download engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// IO error during network or filesystem operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection or command timeout
    #[error("Timeout")]
    Timeout,

    /// Could not establish a connection to the provider
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// NNTP protocol error with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 411, 480, 502)
        code: u16,
        /// Error message from server
        message: String,
    },

    /// No article with the requested message-id (430/423)
    #[error("No such article: {0}")]
    NoSuchArticle(String),

    /// Malformed NZB manifest
    #[error("Invalid NZB: {0}")]
    InvalidNzb(String),

    /// Malformed yEnc data (missing =ybegin/=yend, bad escapes)
    #[error("Invalid yEnc data: {0}")]
    InvalidYenc(String),

    /// Article body decoded to zero bytes
    #[error("Empty article body for {0}")]
    EmptyBody(String),

    /// Every configured provider exhausted its retries for a segment
    #[error("All providers exhausted for segment {0}")]
    AllProvidersExhausted(String),

    /// Filesystem error while assembling output files
    #[error("Assembly failed: {0}")]
    AssemblyIo(String),

    /// PAR2 repair was required and did not succeed
    #[error("PAR2 repair failed: {0}")]
    Par2RepairFailed(String),

    /// Archive extraction failed
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Job was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// No job registered under the given id
    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

impl EngineError {
    /// Whether this error may succeed on another attempt or another provider.
    ///
    /// Cancellation and exhaustion are terminal; everything else feeds the
    /// retry/fallback loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::Cancelled | EngineError::AllProvidersExhausted(_)
        )
    }
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
