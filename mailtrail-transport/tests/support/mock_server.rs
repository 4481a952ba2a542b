//! Scriptable SMTP relay for exercising the SMTP transport
//!
//! The relay can:
#![allow(dead_code)] // Not every test uses every knob
//! - Answer each command with a configured reply
//! - Drop the connection or stall after a number of commands
//! - Record everything the client said, including the message content

use std::{fmt::Write, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
};

/// Command received by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    MessageContent(String),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct RelayConfig {
    greeting: Reply,
    capabilities: Vec<String>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    drop_after_commands: Option<usize>,
    stall_on_command: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "relay.test ESMTP"),
            capabilities: vec!["relay.test".to_string(), "AUTH PLAIN".to_string()],
            auth: Reply::new(235, "Authentication succeeded"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK queued as 7F3A"),
            drop_after_commands: None,
            stall_on_command: None,
        }
    }
}

fn ehlo_reply(capabilities: &[String]) -> Vec<u8> {
    let mut reply = String::new();
    let last = capabilities.len().saturating_sub(1);

    for (index, capability) in capabilities.iter().enumerate() {
        let separator = if index == last { ' ' } else { '-' };
        let _ = write!(&mut reply, "250{separator}{capability}\r\n");
    }

    reply.into_bytes()
}

/// A relay listening on an ephemeral localhost port
pub struct MockRelay {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            config: RelayConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<RelayConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut seen = 0;

        writer.write_all(&config.greeting.to_bytes()).await?;

        loop {
            if config.drop_after_commands.is_some_and(|limit| seen >= limit) {
                return Ok(());
            }

            if config.stall_on_command == Some(seen) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            seen += 1;

            let command_line = line.trim_end();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    ehlo_reply(&config.capabilities),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "AUTH" => (config.auth.to_bytes(), SmtpCommand::Auth(argument.to_string())),
                "MAIL" => (
                    config.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => (config.data.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (
                    b"502 Command not implemented\r\n".to_vec(),
                    SmtpCommand::Other(command_line.to_string()),
                ),
            };

            commands.write().await.push(command.clone());
            writer.write_all(&reply).await?;

            if command == SmtpCommand::Data && config.data.code == 354 {
                let mut content = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(&line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer.write_all(&config.data_end.to_bytes()).await?;
            }
        }
    }
}

pub struct MockRelayBuilder {
    config: RelayConfig,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: &str) -> Self {
        self.config.auth = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: &str) -> Self {
        self.config.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: &str) -> Self {
        self.config.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Close the connection once `count` commands have been read
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Never answer the command at `index` (0-based)
    #[must_use]
    pub const fn with_stall_on_command(mut self, index: usize) -> Self {
        self.config.stall_on_command = Some(index);
        self
    }

    /// Bind and start serving
    ///
    /// # Errors
    ///
    /// If no local port could be bound
    pub async fn build(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let served = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _peer)) = listener.accept().await {
                let config = Arc::clone(&config);
                let commands = Arc::clone(&served);
                tokio::spawn(async move {
                    if let Err(err) = MockRelay::handle_client(stream, config, commands).await {
                        tracing::debug!("Mock relay client error: {}", err);
                    }
                });
            }
        });

        Ok(MockRelay { addr, commands })
    }
}
