//! Audit logging for delivery tracking events
//!
//! Every concluded attempt leaves a durable row behind; these events are the
//! log-side counterpart, useful when the store itself is unreachable.
//!
//! ## Audit Events
//!
//! - `AttemptRegistered`: a pending attempt was opened by the pre-send hook
//! - `DeliverySent`: a `sent` record was written by the post-send hook
//! - `DeliveryFailed`: a `failed` record was written during reconciliation
//!
//! ## PII Redaction
//!
//! Sender and recipient addresses can be redacted through [`AuditConfig`].
//! The domain is kept so that events remain useful for routing diagnostics.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact sender addresses
    #[serde(default)]
    pub redact_sender: bool,

    /// Redact recipient addresses
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialize audit logging with configuration. Only the first call wins.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact the local part of an address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if !redact {
        return email.to_string();
    }

    email.split_once('@').map_or_else(
        || "[REDACTED]".to_string(),
        |(_, domain)| format!("[REDACTED]@{domain}"),
    )
}

/// Redact every address in a comma-separated list
#[must_use]
pub fn redact_list(emails: &str, redact: bool) -> String {
    if !redact || emails.is_empty() {
        return emails.to_string();
    }

    emails
        .split(',')
        .map(|email| redact_email(email.trim(), true))
        .collect::<Vec<_>>()
        .join(",")
}

/// Pending attempt opened
///
/// # Fields
/// - `attempt_id`: ledger identifier of the attempt
/// - `sender`: first `From` address (redacted if configured)
/// - `recipients`: sorted `To` addresses (redacted if configured)
/// - `subject`: truncated subject
/// - `caller`: originating call site, when caller recording is enabled
pub fn log_attempt_registered(
    attempt_id: &str,
    sender: &str,
    recipients: &str,
    subject: &str,
    caller: Option<&str>,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "AttemptRegistered",
        attempt_id = %attempt_id,
        sender = %redact_email(sender, config.redact_sender),
        recipients = %redact_list(recipients, config.redact_recipients),
        subject = %subject,
        caller = caller.unwrap_or(""),
        "Audit: Delivery attempt registered"
    );
}

/// `sent` record written
pub fn log_delivery_sent(sender: &str, subject: &str, mailjet_enabled: bool, retired: bool) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliverySent",
        sender = %redact_email(sender, config.redact_sender),
        subject = %subject,
        mailjet_enabled,
        retired,
        "Audit: Delivery sent"
    );
}

/// `failed` record written
pub fn log_delivery_failed(attempt_id: &str, sender: &str, subject: &str, error: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "DeliveryFailed",
        attempt_id = %attempt_id,
        sender = %redact_email(sender, config.redact_sender),
        subject = %subject,
        error = %error,
        "Audit: Delivery failed"
    );
}
