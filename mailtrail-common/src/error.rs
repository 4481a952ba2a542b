//! Error types for the mailtrail-common crate.
//!
//! Settings and message parsing are the only fallible operations in this
//! crate. Extraction never fails: it degrades to empty strings instead.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading mail settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("Failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The settings document could not be deserialised.
    #[error("Invalid settings in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    /// No settings are available in the current context.
    #[error("Settings unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while turning raw RFC 822 data into an outgoing message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The raw message could not be parsed.
    #[error("Failed to parse message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    /// A header that the message cannot do without was absent or empty.
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    /// The message has no envelope recipients.
    #[error("Message has no recipients")]
    NoRecipients,
}
