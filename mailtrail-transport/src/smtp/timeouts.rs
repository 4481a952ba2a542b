//! Per-phase timeouts for relay sessions.
//!
//! Every protocol phase is bounded on its own so a relay that stalls in the
//! middle of a transaction surfaces as [`TransportError::Timeout`] naming
//! the phase, rather than hanging the send.
//!
//! [`TransportError::Timeout`]: crate::error::TransportError::Timeout

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Timeouts for each phase of an SMTP session, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// TCP connect (and implicit TLS handshake)
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Greeting, EHLO and STARTTLS
    #[serde(default = "defaults::ehlo_secs")]
    pub ehlo_secs: u64,

    #[serde(default = "defaults::auth_secs")]
    pub auth_secs: u64,

    /// MAIL FROM and each RCPT TO
    #[serde(default = "defaults::envelope_secs")]
    pub envelope_secs: u64,

    /// DATA through the final reply
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            ehlo_secs: defaults::ehlo_secs(),
            auth_secs: defaults::auth_secs(),
            envelope_secs: defaults::envelope_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

/// Run `future` under `secs`, mapping expiry to a timeout in `phase`.
pub(crate) async fn bounded<T>(
    secs: u64,
    phase: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(secs), future)
        .await
        .map_err(|_| TransportError::Timeout(phase))?
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn ehlo_secs() -> u64 {
        30
    }

    pub const fn auth_secs() -> u64 {
        30
    }

    pub const fn envelope_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }

    pub const fn quit_secs() -> u64 {
        10
    }
}
