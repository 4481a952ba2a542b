//! Outgoing and sent message model.
//!
//! [`OutgoingMessage`] is what a caller hands to the mailer, [`SentMessage`]
//! is what the transport hands back on success. Both implement
//! [`MessageView`], the read-only surface the extraction service works
//! against.

use std::fmt::{self, Display, Write};

use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// A single address, optionally with a display name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    #[must_use]
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Parse an address-list header value. Groups are flattened into their
    /// members, and anything unparseable yields an empty list.
    #[must_use]
    pub fn parse_list(value: &str) -> Vec<Self> {
        let Ok(list) = mailparse::addrparse(value) else {
            return Vec::new();
        };

        list.iter()
            .flat_map(|addr| match addr {
                mailparse::MailAddr::Single(single) => vec![Self::from(single)],
                mailparse::MailAddr::Group(group) => group.addrs.iter().map(Self::from).collect(),
            })
            .collect()
    }
}

impl From<&mailparse::SingleInfo> for Mailbox {
    fn from(value: &mailparse::SingleInfo) -> Self {
        Self {
            name: value.display_name.clone(),
            address: value.addr.clone(),
        }
    }
}

impl From<&str> for Mailbox {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "\"{name}\" <{}>", self.address),
            _ => f.write_str(&self.address),
        }
    }
}

fn join(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read-only view of a message used for field extraction.
///
/// A view may wrap another message (a sent message wraps the original one);
/// extraction consults the view itself first and then [`Self::original`].
pub trait MessageView {
    fn subject(&self) -> Option<&str>;

    fn from_addresses(&self) -> &[Mailbox];

    fn to_addresses(&self) -> &[Mailbox];

    fn original(&self) -> Option<&dyn MessageView> {
        None
    }
}

/// A message on its way to the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    from: Vec<Mailbox>,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    bcc: Vec<Mailbox>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: String,
}

impl OutgoingMessage {
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Parse a complete RFC 822 message, keeping its body verbatim.
    ///
    /// # Errors
    ///
    /// If the header block cannot be parsed, or the message has neither a
    /// sender nor any recipient.
    pub fn from_rfc822(raw: &[u8]) -> Result<Self, MessageError> {
        let (headers, body_offset) = mailparse::parse_headers(raw)?;
        let mut message = Self::default();

        for header in headers {
            let key = header.get_key();
            let value = header.get_value();

            match key.to_ascii_lowercase().as_str() {
                "from" => message.from.extend(Mailbox::parse_list(&value)),
                "to" => message.to.extend(Mailbox::parse_list(&value)),
                "cc" => message.cc.extend(Mailbox::parse_list(&value)),
                "bcc" => message.bcc.extend(Mailbox::parse_list(&value)),
                "subject" => message.subject = Some(value),
                _ => message.headers.push((key, value)),
            }
        }

        if message.from.is_empty() {
            return Err(MessageError::MissingHeader("From"));
        }

        if message.envelope_recipients().is_empty() {
            return Err(MessageError::NoRecipients);
        }

        message.body = String::from_utf8_lossy(&raw[body_offset.min(raw.len())..]).into_owned();

        Ok(message)
    }

    #[must_use]
    pub fn from(&self) -> &[Mailbox] {
        &self.from
    }

    #[must_use]
    pub fn to(&self) -> &[Mailbox] {
        &self.to
    }

    #[must_use]
    pub fn cc(&self) -> &[Mailbox] {
        &self.cc
    }

    #[must_use]
    pub fn bcc(&self) -> &[Mailbox] {
        &self.bcc
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive lookup of an additional header
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.header("Message-ID")
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The `MAIL FROM` address: the first `From` mailbox.
    #[must_use]
    pub fn envelope_sender(&self) -> Option<&str> {
        self.from.first().map(|mailbox| mailbox.address.as_str())
    }

    /// The `RCPT TO` addresses: every `To`, `Cc` and `Bcc` mailbox.
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|mailbox| mailbox.address.as_str())
            .collect()
    }

    /// Render the message as it goes over the wire. `Bcc` is never rendered.
    #[must_use]
    pub fn to_rfc822(&self) -> String {
        let mut message = String::with_capacity(self.body.len() + 512);

        // Writing into a String cannot fail.
        if !self.from.is_empty() {
            let _ = write!(message, "From: {}\r\n", join(&self.from));
        }

        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", join(&self.to));
        }

        if !self.cc.is_empty() {
            let _ = write!(message, "Cc: {}\r\n", join(&self.cc));
        }

        if let Some(subject) = &self.subject {
            let _ = write!(message, "Subject: {subject}\r\n");
        }

        for (name, value) in &self.headers {
            let _ = write!(message, "{name}: {value}\r\n");
        }

        if self.header("MIME-Version").is_none() {
            message.push_str("MIME-Version: 1.0\r\n");
        }

        if self.header("Content-Type").is_none() {
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        }

        message.push_str("\r\n");
        message.push_str(&self.body);

        message
    }
}

impl MessageView for OutgoingMessage {
    fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    fn from_addresses(&self) -> &[Mailbox] {
        &self.from
    }

    fn to_addresses(&self) -> &[Mailbox] {
        &self.to
    }
}

/// Builder for [`OutgoingMessage`].
///
/// # Examples
///
/// ```
/// use mailtrail_common::message::OutgoingMessage;
///
/// let message = OutgoingMessage::builder()
///     .from("billing@example.com")
///     .to("customer@example.org")
///     .subject("Invoice #42")
///     .body("Please find your invoice attached.")
///     .build();
///
/// assert_eq!(message.subject(), Some("Invoice #42"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    message: OutgoingMessage,
}

impl MessageBuilder {
    /// Adds a `From` mailbox.
    #[must_use]
    pub fn from(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.message.from.push(mailbox.into());
        self
    }

    /// Adds a `To` recipient.
    #[must_use]
    pub fn to(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.message.to.push(mailbox.into());
        self
    }

    /// Adds a `Cc` recipient.
    #[must_use]
    pub fn cc(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.message.cc.push(mailbox.into());
        self
    }

    /// Adds a `Bcc` recipient.
    #[must_use]
    pub fn bcc(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.message.bcc.push(mailbox.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = Some(subject.into());
        self
    }

    /// Adds a custom header.
    ///
    /// Use the dedicated methods for address headers and the subject, they
    /// are tracked separately and rendered first.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.message.body = content.into();
        self
    }

    #[must_use]
    pub fn build(self) -> OutgoingMessage {
        self.message
    }
}

/// The transport's receipt for a transmitted message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    original: OutgoingMessage,
    message_id: String,
    response: String,
}

impl SentMessage {
    #[must_use]
    pub fn new(
        original: OutgoingMessage,
        message_id: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            original,
            message_id: message_id.into(),
            response: response.into(),
        }
    }

    #[must_use]
    pub const fn original_message(&self) -> &OutgoingMessage {
        &self.original
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The final server reply, e.g. `250 OK queued as 1234`
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }
}

impl MessageView for SentMessage {
    fn subject(&self) -> Option<&str> {
        None
    }

    fn from_addresses(&self) -> &[Mailbox] {
        &[]
    }

    fn to_addresses(&self) -> &[Mailbox] {
        &[]
    }

    fn original(&self) -> Option<&dyn MessageView> {
        Some(&self.original)
    }
}
