use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use mailtrail_common::{
    OutgoingMessage, SentMessage,
    config::{Encryption, MailjetSettings, SmtpEndpoint},
    outgoing,
};
use serde::{Deserialize, Serialize};

use super::{
    auth::Credentials,
    client::SmtpClient,
    response::Response,
    timeouts::{SmtpTimeouts, bounded},
};
use crate::{
    error::{Result, TransportError},
    transport::Transport,
};

/// Session options independent of the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpOptions {
    /// Name announced in `EHLO`, also used for generated Message-IDs
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Skip certificate verification (testing only)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpOptions {
    fn default() -> Self {
        Self {
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// Sends each message over its own SMTP session.
#[derive(Debug)]
pub struct SmtpTransport {
    endpoint: SmtpEndpoint,
    credentials: Option<Credentials>,
    options: SmtpOptions,
    sequence: AtomicU64,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(
        endpoint: SmtpEndpoint,
        credentials: Option<Credentials>,
        options: SmtpOptions,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            options,
            sequence: AtomicU64::new(0),
        }
    }

    /// Build a transport for the configured relay.
    ///
    /// # Errors
    ///
    /// If no relay server is configured.
    pub fn from_settings(settings: &MailjetSettings, options: SmtpOptions) -> Result<Self> {
        let endpoint = settings.endpoint().ok_or_else(|| {
            TransportError::custom("InvalidConfiguration", "no SMTP server configured")
        })?;

        let credentials = settings
            .has_credentials()
            .then(|| Credentials::new(&settings.smtp_username, &settings.smtp_password));

        Ok(Self::new(endpoint, credentials, options))
    }

    #[must_use]
    pub const fn endpoint(&self) -> &SmtpEndpoint {
        &self.endpoint
    }

    fn generate_message_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        format!("<{millis}.{sequence}@{}>", self.options.helo_name)
    }

    async fn transaction(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        let sender = message
            .envelope_sender()
            .ok_or_else(|| TransportError::InvalidMessage("message has no sender".to_string()))?;
        let recipients = message.envelope_recipients();
        if recipients.is_empty() {
            return Err(TransportError::InvalidMessage(
                "message has no recipients".to_string(),
            ));
        }

        let timeouts = &self.options.timeouts;
        let address = self.endpoint.address();

        let mut client = bounded(timeouts.connect_secs, "connect", async {
            let mut client = SmtpClient::connect(&address, self.endpoint.host.clone())
                .await?
                .accept_invalid_certs(self.options.accept_invalid_certs);

            if self.endpoint.encryption == Some(Encryption::Ssl) {
                client.implicit_tls().await?;
            }

            Ok(client)
        })
        .await?;

        let greeting = bounded(timeouts.ehlo_secs, "greeting", client.read_greeting()).await?;
        expect(&greeting, &[220])?;

        let ehlo = format!("EHLO {}", self.options.helo_name);
        let mut capabilities =
            bounded(timeouts.ehlo_secs, "EHLO", client.command(&ehlo)).await?;
        expect(&capabilities, &[250])?;

        if self.endpoint.encryption == Some(Encryption::Tls) {
            if !capabilities.has_capability("STARTTLS") {
                return Err(TransportError::Tls(format!(
                    "{} does not offer STARTTLS",
                    self.endpoint.host
                )));
            }

            let reply = bounded(timeouts.ehlo_secs, "STARTTLS", client.starttls()).await?;
            expect(&reply, &[220])?;

            capabilities = bounded(timeouts.ehlo_secs, "EHLO", client.command(&ehlo)).await?;
            expect(&capabilities, &[250])?;
        }

        if let Some(credentials) = &self.credentials {
            let command = format!("AUTH PLAIN {}", credentials.plain_token());
            let reply = bounded(timeouts.auth_secs, "AUTH", client.command(&command)).await?;
            expect(&reply, &[235])?;
        }

        let reply = bounded(
            timeouts.envelope_secs,
            "MAIL FROM",
            client.command(&format!("MAIL FROM:<{sender}>")),
        )
        .await?;
        expect(&reply, &[250])?;

        for recipient in &recipients {
            let reply = bounded(
                timeouts.envelope_secs,
                "RCPT TO",
                client.command(&format!("RCPT TO:<{recipient}>")),
            )
            .await?;
            expect(&reply, &[250, 251])?;
        }

        let (message_id, rendered) = match message.message_id() {
            Some(id) => (id.to_string(), message.to_rfc822()),
            None => {
                let id = self.generate_message_id();
                let rendered = format!("Message-ID: {id}\r\n{}", message.to_rfc822());
                (id, rendered)
            }
        };

        let accepted = bounded(timeouts.data_secs, "DATA", async {
            let reply = client.command("DATA").await?;
            expect(&reply, &[354])?;

            let reply = client.send_data(&dot_stuff(&rendered)).await?;
            expect(&reply, &[250])?;
            Ok(reply)
        })
        .await?;

        if let Err(err) = bounded(timeouts.quit_secs, "QUIT", client.command("QUIT")).await {
            outgoing!(level = DEBUG, "QUIT after accepted message failed: {}", err);
        }

        Ok(SentMessage::new(
            message.clone(),
            message_id,
            accepted.to_line(),
        ))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        outgoing!(
            level = DEBUG,
            "Sending message to {} recipient(s) via {}",
            message.envelope_recipients().len(),
            self.endpoint
        );

        self.transaction(message).await
    }

    fn describe(&self) -> String {
        format!("smtp://{}", self.endpoint.address())
    }
}

/// Map a reply to an error unless its code is one of `accepted`.
fn expect(response: &Response, accepted: &[u16]) -> Result<()> {
    if accepted.contains(&response.code) {
        return Ok(());
    }

    if response.is_error() {
        Err(TransportError::SmtpRejected {
            code: response.code,
            message: response.message(),
        })
    } else {
        Err(TransportError::UnexpectedResponse {
            code: response.code,
            message: response.message(),
        })
    }
}

/// Normalise line endings to CRLF and escape leading dots (RFC 5321 4.5.2).
#[must_use]
pub fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 16);

    for (index, line) in data.split('\n').enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }

        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }

    out
}
