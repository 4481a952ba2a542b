//! Error types for mail transports.

use std::io;

use thiserror::Error;

/// Errors a transport can raise while sending a message.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The TCP connection to the relay could not be established.
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    /// The server answered with a status code that makes no sense here.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// The server refused the message (4xx or 5xx).
    #[error("SMTP error: {code} - {message}")]
    SmtpRejected { code: u16, message: String },

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// A protocol phase took longer than its configured timeout.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The message cannot be transmitted as built.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Raised by transports outside this crate.
    #[error("{message}")]
    Custom { kind: String, message: String },
}

impl TransportError {
    /// A stable label naming the class of failure.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Connect { .. } => "ConnectionFailed",
            Self::Io(_) => "IoError",
            Self::Parse(_) => "ResponseParseError",
            Self::UnexpectedResponse { .. } => "UnexpectedResponse",
            Self::SmtpRejected { .. } => "SmtpRejected",
            Self::Tls(_) => "TlsError",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::Timeout(_) => "Timeout",
            Self::InvalidMessage(_) => "InvalidMessage",
            Self::Utf8(_) => "Utf8Error",
            Self::Custom { kind, .. } => kind,
        }
    }

    #[must_use]
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is a 4xx reply that may succeed later
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::SmtpRejected { code, .. } if *code >= 400 && *code < 500)
    }
}

/// Specialized `Result` type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
