//! Delivery records and their persisted row shape.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mailtrail_common::{
    DeliveryStatus,
    extract::{MAX_ADDRESS_LENGTH, MAX_SUBJECT_LENGTH, truncate},
};
use serde::{Deserialize, Serialize};

/// Table every delivery row is written to.
pub const DELIVERY_TABLE: &str = "tx_mailjet_domain_model_emaillog";

/// The terminal outcome of one send attempt.
///
/// Immutable once built. Constructors enforce the column limits, so a
/// record can always be written without further validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    sent_at: SystemTime,
    mailjet_enabled: bool,
    sender_address: String,
    subject: String,
    delivery_status: DeliveryStatus,
    exception_message: Option<String>,
}

impl DeliveryRecord {
    #[must_use]
    pub fn new(
        delivery_status: DeliveryStatus,
        sent_at: SystemTime,
        mailjet_enabled: bool,
        subject: &str,
        sender_address: &str,
        exception_message: Option<String>,
    ) -> Self {
        Self {
            sent_at,
            mailjet_enabled,
            sender_address: truncate(sender_address, MAX_ADDRESS_LENGTH),
            subject: truncate(subject, MAX_SUBJECT_LENGTH),
            delivery_status,
            exception_message,
        }
    }

    /// A successful send, without an exception message.
    #[must_use]
    pub fn sent(
        sent_at: SystemTime,
        mailjet_enabled: bool,
        subject: &str,
        sender_address: &str,
    ) -> Self {
        Self::new(
            DeliveryStatus::Sent,
            sent_at,
            mailjet_enabled,
            subject,
            sender_address,
            None,
        )
    }

    /// A failed send carrying its diagnostic.
    #[must_use]
    pub fn failed(
        sent_at: SystemTime,
        mailjet_enabled: bool,
        subject: &str,
        sender_address: &str,
        exception_message: impl Into<String>,
    ) -> Self {
        Self::new(
            DeliveryStatus::Failed,
            sent_at,
            mailjet_enabled,
            subject,
            sender_address,
            Some(exception_message.into()),
        )
    }

    #[must_use]
    pub const fn sent_at(&self) -> SystemTime {
        self.sent_at
    }

    #[must_use]
    pub const fn mailjet_enabled(&self) -> bool {
        self.mailjet_enabled
    }

    #[must_use]
    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub const fn delivery_status(&self) -> DeliveryStatus {
        self.delivery_status
    }

    #[must_use]
    pub fn exception_message(&self) -> Option<&str> {
        self.exception_message.as_deref()
    }

    /// The fixed-column row for this record, stamped with `now`.
    #[must_use]
    pub fn to_row(&self, now: SystemTime) -> DeliveryRow {
        let stamp = unix_seconds(now);

        DeliveryRow {
            pid: 0,
            tstamp: stamp,
            crdate: stamp,
            sent_at: unix_seconds(self.sent_at),
            mailjet_enabled: u8::from(self.mailjet_enabled),
            sender_address: self.sender_address.clone(),
            subject: self.subject.clone(),
            delivery_status: self.delivery_status,
            exception_message: self.exception_message.clone(),
        }
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// A delivery row as written by either persistence path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRow {
    pub pid: u32,
    pub tstamp: u64,
    pub crdate: u64,
    pub sent_at: u64,
    /// Stored as an integer flag
    pub mailjet_enabled: u8,
    pub sender_address: String,
    pub subject: String,
    pub delivery_status: DeliveryStatus,
    pub exception_message: Option<String>,
}

impl DeliveryRow {
    /// Whether this row carries the same field values as `record`.
    #[must_use]
    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        self.sent_at == unix_seconds(record.sent_at)
            && self.mailjet_enabled == u8::from(record.mailjet_enabled)
            && self.sender_address == record.sender_address
            && self.subject == record.subject
            && self.delivery_status == record.delivery_status
            && self.exception_message == record.exception_message
    }
}
