//! Mailjet relay settings.
//!
//! The settings are a flat key-value bundle (`smtpServer`, `smtpUsername`,
//! `smtpPassword`, `enabled`). Delivery tracking only ever asks one question
//! of them: are all three SMTP fields present? Any failure to answer that
//! question is treated as "no".

use std::{
    fmt::{self, Debug, Display},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const SSL_PORT: u16 = 465;
const SUBMISSION_PORT: u16 = 587;

/// Credentials and endpoint of the SMTP relay.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailjetSettings {
    /// Whether the relay should replace the host's own transport
    pub enabled: bool,
    /// `host` or `host:port`
    pub smtp_server: String,
    pub smtp_username: String,
    pub smtp_password: String,
}

impl Debug for MailjetSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailjetSettings")
            .field("enabled", &self.enabled)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_username", &self.smtp_username)
            .field(
                "smtp_password",
                &if self.smtp_password.is_empty() {
                    ""
                } else {
                    "[REDACTED]"
                },
            )
            .finish()
    }
}

impl MailjetSettings {
    /// Returns `true` when server, username and password are all non-empty.
    ///
    /// This is the `mailjet_enabled` flag stamped on every delivery record.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.smtp_server.is_empty()
            && !self.smtp_username.is_empty()
            && !self.smtp_password.is_empty()
    }

    /// Returns `true` when both username and password are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.smtp_username.is_empty() && !self.smtp_password.is_empty()
    }

    /// The relay endpoint, if a server is configured.
    #[must_use]
    pub fn endpoint(&self) -> Option<SmtpEndpoint> {
        SmtpEndpoint::parse(&self.smtp_server)
    }
}

/// Transport encryption negotiated with the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// TLS from the first byte (port 465)
    Ssl,
    /// Plaintext connection upgraded with STARTTLS
    Tls,
}

impl Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ssl => "ssl",
            Self::Tls => "tls",
        })
    }
}

/// A parsed `smtpServer` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    pub encryption: Option<Encryption>,
}

impl SmtpEndpoint {
    /// Parse `host` or `host:port`.
    ///
    /// Encryption follows the port: 465 uses implicit TLS, 587 uses STARTTLS,
    /// a bare host defaults to STARTTLS on 587 and any other port is left
    /// unencrypted.
    #[must_use]
    pub fn parse(server: &str) -> Option<Self> {
        let server = server.trim();
        if server.is_empty() {
            return None;
        }

        let Some((host, port)) = server
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)))
        else {
            return Some(Self {
                host: server.to_string(),
                port: SUBMISSION_PORT,
                encryption: Some(Encryption::Tls),
            });
        };

        if host.is_empty() {
            return None;
        }

        let encryption = match port {
            SSL_PORT => Some(Encryption::Ssl),
            SUBMISSION_PORT => Some(Encryption::Tls),
            _ => None,
        };

        Some(Self {
            host: host.to_string(),
            port,
            encryption,
        })
    }

    /// `host:port`, suitable for `TcpStream::connect`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for SmtpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encryption {
            Some(encryption) => write!(f, "{}:{} ({encryption})", self.host, self.port),
            None => write!(f, "{}:{} (plaintext)", self.host, self.port),
        }
    }
}

/// Something that can produce the current relay settings.
///
/// Implementations may fail; callers that only need the enabled flag should
/// go through [`mailjet_enabled`], which maps every failure to `false`.
pub trait SettingsSource: Send + Sync {
    /// Load the current settings
    ///
    /// # Errors
    ///
    /// If the settings are unavailable or malformed
    fn load(&self) -> Result<MailjetSettings, ConfigError>;
}

impl SettingsSource for MailjetSettings {
    fn load(&self) -> Result<MailjetSettings, ConfigError> {
        Ok(self.clone())
    }
}

/// Settings read from a RON file on every [`SettingsSource::load`].
#[derive(Debug, Clone)]
pub struct RonSettingsFile {
    path: PathBuf,
}

impl RonSettingsFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsSource for RonSettingsFile {
    fn load(&self) -> Result<MailjetSettings, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;

        ron::from_str(&content).map_err(|e| ConfigError::Invalid {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Whether the relay is fully configured, treating any load failure as `false`.
pub fn mailjet_enabled(source: &dyn SettingsSource) -> bool {
    match source.load() {
        Ok(settings) => settings.is_configured(),
        Err(err) => {
            tracing::debug!(error = %err, "Mail settings unavailable, treating relay as disabled");
            false
        }
    }
}
