//! A single relay session over a buffered stream.
//!
//! Replies are read line by line; the stream is plaintext until
//! [`SmtpClient::implicit_tls`] or a successful [`SmtpClient::starttls`]
//! swaps it for a TLS stream over the same socket.

use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};
use tracing::{trace, warn};

use super::response::Response;
use crate::error::{Result, TransportError};

/// Upper bound on one (possibly multi-line) reply
const MAX_REPLY_BYTES: u64 = 64 * 1024;

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// One SMTP session to a relay.
pub struct SmtpClient {
    stream: Option<BufStream<Box<dyn Io>>>,
    host: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Open a plaintext connection to `address`; `host` is the name checked
    /// against the relay's certificate if the session is upgraded.
    ///
    /// # Errors
    ///
    /// If the TCP connection cannot be established.
    pub async fn connect(address: &str, host: impl Into<String>) -> Result<Self> {
        let socket = TcpStream::connect(address)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            stream: Some(BufStream::new(Box::new(socket))),
            host: host.into(),
            accept_invalid_certs: false,
        })
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Wrap the connection in TLS before anything is exchanged (port 465).
    ///
    /// # Errors
    ///
    /// If the handshake fails.
    pub async fn implicit_tls(&mut self) -> Result<()> {
        self.secure().await
    }

    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_reply().await
    }

    /// Send a command line and read its reply.
    ///
    /// # Errors
    ///
    /// If sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        let stream = self.stream()?;
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        self.read_reply().await
    }

    /// Send `STARTTLS` and, if the relay agrees, secure the session.
    ///
    /// # Errors
    ///
    /// If the command or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let reply = self.command("STARTTLS").await?;
        if reply.is_success() {
            self.secure().await?;
        }

        Ok(reply)
    }

    /// Send the (already dot-stuffed) message followed by the terminator.
    ///
    /// # Errors
    ///
    /// If sending or reading fails.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let stream = self.stream()?;
        stream.write_all(data.as_bytes()).await?;
        if !data.is_empty() && !data.ends_with("\r\n") {
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b".\r\n").await?;
        stream.flush().await?;

        self.read_reply().await
    }

    fn stream(&mut self) -> Result<&mut BufStream<Box<dyn Io>>> {
        self.stream.as_mut().ok_or(TransportError::ConnectionClosed)
    }

    async fn secure(&mut self) -> Result<()> {
        let socket = self
            .stream
            .take()
            .ok_or(TransportError::ConnectionClosed)?
            .into_inner();

        let name = ServerName::try_from(self.host.clone()).map_err(|err| {
            TransportError::Tls(format!("invalid server name {}: {err}", self.host))
        })?;

        let secured = connector(self.accept_invalid_certs)?
            .connect(name, socket)
            .await
            .map_err(|err| TransportError::Tls(err.to_string()))?;

        trace!(host = %self.host, "Session secured");
        self.stream = Some(BufStream::new(Box::new(secured)));
        Ok(())
    }

    /// Read lines until the one whose code is followed by a space.
    async fn read_reply(&mut self) -> Result<Response> {
        let stream = self.stream()?;
        let mut lines = Vec::new();
        let mut code = None;
        let mut budget = MAX_REPLY_BYTES;

        loop {
            let mut raw = String::new();
            let read = (&mut *stream).take(budget).read_line(&mut raw).await?;
            if read == 0 {
                return Err(if budget == 0 {
                    TransportError::Parse(format!("reply exceeds {MAX_REPLY_BYTES} bytes"))
                } else {
                    TransportError::ConnectionClosed
                });
            }
            budget = budget.saturating_sub(read as u64);

            if !raw.ends_with('\n') {
                if budget == 0 {
                    return Err(TransportError::Parse(format!(
                        "reply exceeds {MAX_REPLY_BYTES} bytes"
                    )));
                }
                return Err(TransportError::ConnectionClosed);
            }

            let text = raw.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }

            let line = Response::parse_line(text)?;
            match code {
                None => code = Some(line.code),
                Some(first) if first != line.code => {
                    return Err(TransportError::Parse(format!(
                        "reply mixes codes {first} and {}",
                        line.code
                    )));
                }
                Some(_) => {}
            }
            lines.push(line.message);

            if line.is_last {
                let reply = Response::new(line.code, lines);
                trace!(code = reply.code, "SMTP reply");
                return Ok(reply);
            }
        }
    }
}

fn connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let config = if accept_invalid_certs {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

fn native_roots() -> Result<RootCertStore> {
    let loaded = rustls_native_certs::load_native_certs();
    if !loaded.errors.is_empty() {
        warn!(errors = loaded.errors.len(), "Some system certificates could not be loaded");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    trace!(added, ignored, "Loaded system trust roots");

    if roots.is_empty() {
        return Err(TransportError::Tls("no usable system trust roots".to_string()));
    }

    Ok(roots)
}

/// Skips certificate checks entirely; only for relays under test.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
        ]
    }
}
