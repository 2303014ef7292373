//! Frame decoding errors.

use thiserror::Error;

/// Errors produced while decoding a STOMP payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The command line is not a STOMP command.
    #[error("unknown STOMP command: {0:?}")]
    UnknownCommand(String),
    /// A header line has no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// A header contains a backslash escape STOMP does not define.
    #[error("invalid escape sequence \\{0} in header")]
    InvalidEscape(char),
    /// `content-length` is not a number, or does not fit the payload.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    /// The frame ended before its NUL terminator.
    #[error("frame is missing its NUL terminator")]
    MissingTerminator,
    /// The frame ended before the blank line that closes the header block.
    #[error("frame ended inside the header block")]
    TruncatedHeaders,
}

/// Result type for frame operations.
pub type Result<T> = std::result::Result<T, FrameError>;
