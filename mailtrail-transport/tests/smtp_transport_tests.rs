//! End-to-end tests for the SMTP transport against a scripted relay
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use mailtrail_common::{OutgoingMessage, config::SmtpEndpoint};
use mailtrail_transport::{
    CaptureTransport, Credentials, FailureSlot, SmtpOptions, SmtpTimeouts, SmtpTransport, Transport,
    TransportError,
};
use support::mock_server::{MockRelay, SmtpCommand};

fn invoice() -> OutgoingMessage {
    OutgoingMessage::builder()
        .from("billing@example.com")
        .to("customer@example.org")
        .subject("Invoice #42")
        .body("Your invoice is attached.\n.hidden line\n")
        .build()
}

fn transport_for(relay: &MockRelay, credentials: Option<Credentials>) -> SmtpTransport {
    let endpoint = SmtpEndpoint {
        host: "127.0.0.1".to_string(),
        port: relay.addr().port(),
        encryption: None,
    };

    let options = SmtpOptions {
        helo_name: "app.example.com".to_string(),
        timeouts: SmtpTimeouts {
            envelope_secs: 1,
            ..SmtpTimeouts::default()
        },
        ..SmtpOptions::default()
    };

    SmtpTransport::new(endpoint, credentials, options)
}

#[tokio::test]
async fn test_successful_delivery() {
    let relay = MockRelay::builder().build().await.unwrap();
    let transport = transport_for(&relay, None);

    let sent = transport.send(&invoice()).await.unwrap();

    assert_eq!(sent.response(), "250 OK queued as 7F3A");
    assert!(sent.message_id().ends_with("@app.example.com>"));

    let commands = relay.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("app.example.com".to_string()));
    assert!(commands.contains(&SmtpCommand::MailFrom("FROM:<billing@example.com>".to_string())));
    assert!(commands.contains(&SmtpCommand::RcptTo("TO:<customer@example.org>".to_string())));
    assert!(!commands.iter().any(|c| matches!(c, SmtpCommand::Auth(_))));

    let content = commands
        .iter()
        .find_map(|c| match c {
            SmtpCommand::MessageContent(content) => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert!(content.starts_with("Message-ID: "));
    assert!(content.contains("Subject: Invoice #42\r\n"));
    assert!(content.contains("\r\n..hidden line\r\n"));
}

#[tokio::test]
async fn test_credentials_are_sent_as_auth_plain() {
    let relay = MockRelay::builder().build().await.unwrap();
    let transport = transport_for(&relay, Some(Credentials::new("user", "pass")));

    transport.send(&invoice()).await.unwrap();

    let commands = relay.commands().await;
    assert!(commands.contains(&SmtpCommand::Auth("PLAIN AHVzZXIAcGFzcw==".to_string())));
}

#[tokio::test]
async fn test_auth_failure_is_rejected() {
    let relay = MockRelay::builder()
        .with_auth_response(535, "Authentication credentials invalid")
        .build()
        .await
        .unwrap();
    let transport = transport_for(&relay, Some(Credentials::new("user", "wrong")));

    let err = transport.send(&invoice()).await.unwrap_err();

    assert!(matches!(err, TransportError::SmtpRejected { code: 535, .. }));
    assert_eq!(err.kind(), "SmtpRejected");
}

#[tokio::test]
async fn test_rejected_recipient() {
    let relay = MockRelay::builder()
        .with_rcpt_to_response(550, "Mailbox unavailable")
        .build()
        .await
        .unwrap();
    let transport = transport_for(&relay, None);

    let err = transport.send(&invoice()).await.unwrap_err();

    match err {
        TransportError::SmtpRejected { code, message } => {
            assert_eq!(code, 550);
            assert_eq!(message, "Mailbox unavailable");
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    let commands = relay.commands().await;
    assert!(!commands.contains(&SmtpCommand::Data));
}

#[tokio::test]
async fn test_dropped_connection() {
    let relay = MockRelay::builder()
        .with_network_error_after_commands(1)
        .build()
        .await
        .unwrap();
    let transport = transport_for(&relay, None);

    let err = transport.send(&invoice()).await.unwrap_err();

    assert!(matches!(
        err,
        TransportError::ConnectionClosed | TransportError::Io(_)
    ));
}

#[tokio::test]
async fn test_stalled_relay_times_out() {
    // EHLO is command 0, MAIL FROM is command 1
    let relay = MockRelay::builder()
        .with_stall_on_command(1)
        .build()
        .await
        .unwrap();
    let transport = transport_for(&relay, None);

    let err = transport.send(&invoice()).await.unwrap_err();

    assert!(matches!(err, TransportError::Timeout("MAIL FROM")));
    assert_eq!(err.kind(), "Timeout");
}

#[tokio::test]
async fn test_connection_refused() {
    let endpoint = SmtpEndpoint {
        host: "127.0.0.1".to_string(),
        port: 1,
        encryption: None,
    };
    let transport = SmtpTransport::new(endpoint, None, SmtpOptions::default());

    let err = transport.send(&invoice()).await.unwrap_err();

    assert_eq!(err.kind(), "ConnectionFailed");
}

#[tokio::test]
async fn test_starttls_required_when_configured() {
    let relay = MockRelay::builder()
        .with_capabilities(&["relay.test", "SIZE 1000"])
        .build()
        .await
        .unwrap();

    let endpoint = SmtpEndpoint {
        host: "127.0.0.1".to_string(),
        port: relay.addr().port(),
        encryption: Some(mailtrail_common::config::Encryption::Tls),
    };
    let transport = SmtpTransport::new(endpoint, None, SmtpOptions::default());

    let err = transport.send(&invoice()).await.unwrap_err();

    assert!(matches!(err, TransportError::Tls(_)));
}

#[tokio::test]
async fn test_capture_records_relay_failure() {
    let relay = MockRelay::builder()
        .with_data_end_response(554, "Message rejected as spam")
        .build()
        .await
        .unwrap();
    let slot = FailureSlot::new();
    let transport = CaptureTransport::new(transport_for(&relay, None), slot.clone());

    let err = transport.send(&invoice()).await.unwrap_err();
    assert!(matches!(err, TransportError::SmtpRejected { code: 554, .. }));

    let failure = slot.get().unwrap();
    assert_eq!(failure.kind(), "SmtpRejected");
    assert!(failure.message().contains("Message rejected as spam"));
    assert_eq!(failure.failed_message().subject(), Some("Invoice #42"));
}
