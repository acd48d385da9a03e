use std::io;

use thiserror::Error;

/// Startup errors. These are the only errors that abort the process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors scoped to a single connection. Any of these closes the affected
/// connection and frees its slot; the reactor keeps running.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("request does not fit in the receive buffer")]
    RequestTooLarge,

    #[error("connection closed by peer before the request completed")]
    PeerClosed,

    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid request head: {0}")]
    Header(#[from] httparse::Error),

    #[error("request line is incomplete")]
    MissingRequestLine,

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
}

/// Failure reported by a route handler. The dispatcher turns any of these
/// into a 500 response.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid file path: {0}")]
    Path(#[from] PathError),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

/// Errors raised while turning route match results into a filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("too many path segments")]
    TooManySegments,

    #[error("file path too long")]
    TooLong,

    #[error("invalid path segment")]
    InvalidSegment,
}

pub type ServerResult<T> = Result<T, ServerError>;
pub type HandlerResult = Result<(), HandlerError>;
