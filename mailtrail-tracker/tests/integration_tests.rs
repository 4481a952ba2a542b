//! End-to-end tracking scenarios: a mailer wired through a delivery scope
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use mailtrail_common::{
    DeliveryStatus, OutgoingMessage,
    config::{MailjetSettings, RonSettingsFile, SettingsSource, SmtpEndpoint},
};
use mailtrail_store::{DeliveryRow, PersistenceGateway, TestStore};
use mailtrail_tracker::{
    DeliveryScope, FatalError, FatalKind, INCOMPLETE_MESSAGE, TestClock, TrackerConfig,
};
use mailtrail_transport::{
    AfterSendEvent, BeforeSendEvent, MailEventListener, Mailer, MemoryTransport, SmtpOptions,
    SmtpTransport, TransportError,
};

fn configured() -> MailjetSettings {
    MailjetSettings {
        enabled: true,
        smtp_server: "in-v3.mailjet.com:587".to_string(),
        smtp_username: "api-key".to_string(),
        smtp_password: "api-secret".to_string(),
    }
}

fn scope_with(store: &TestStore, settings: impl SettingsSource + 'static) -> DeliveryScope {
    DeliveryScope::new(
        PersistenceGateway::from_store(Arc::new(store.clone())),
        Arc::new(settings),
        TrackerConfig::default(),
    )
}

fn invoice(subject: &str) -> OutgoingMessage {
    OutgoingMessage::builder()
        .from("billing@example.com")
        .to("customer@example.org")
        .subject(subject)
        .body("Please find your invoice attached.")
        .build()
}

fn by_status(rows: &[DeliveryRow], status: DeliveryStatus) -> Vec<&DeliveryRow> {
    rows.iter().filter(|row| row.delivery_status == status).collect()
}

#[tokio::test]
async fn test_successful_send_records_sent_and_empties_ledger() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    let mailer = Mailer::new(scope.instrument(transport.clone())).with_listener(scope.tracker());

    let result = scope
        .run(async { mailer.send(&invoice("Invoice #42")).await })
        .await;

    assert!(result.is_ok());
    assert_eq!(transport.delivered().len(), 1);
    assert!(scope.context().ledger().is_empty());

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Sent);
    assert_eq!(rows[0].subject, "Invoice #42");
    assert_eq!(rows[0].sender_address, "billing@example.com");
    assert_eq!(rows[0].mailjet_enabled, 1);
    assert_eq!(rows[0].pid, 0);
    assert!(rows[0].exception_message.is_none());
}

#[tokio::test]
async fn test_transport_failure_is_reconciled_as_failed() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::Connect {
        address: "in-v3.mailjet.com:587".to_string(),
        source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
    });
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    let err = mailer.send(&invoice("Invoice #42")).await.unwrap_err();

    // The caller sees the transport's own error
    assert_eq!(err.kind(), "ConnectionFailed");
    assert!(store.rows().is_empty());
    assert_eq!(scope.context().ledger().len(), 1);

    assert_eq!(scope.finish(), 1);

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Failed);
    assert_eq!(rows[0].subject, "Invoice #42");
    let message = rows[0].exception_message.as_deref().unwrap();
    assert!(message.starts_with("ConnectionFailed: "), "{message}");
    assert!(message.contains("in-v3.mailjet.com:587"), "{message}");
    assert!(scope.context().failure_slot().is_empty());
}

#[tokio::test]
async fn test_network_failure_over_smtp() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let endpoint = SmtpEndpoint {
        host: "127.0.0.1".to_string(),
        port: 1,
        encryption: None,
    };
    let transport = SmtpTransport::new(endpoint, None, SmtpOptions::default());
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    let result = scope
        .run(async { mailer.send(&invoice("Invoice #42")).await })
        .await;

    assert!(result.is_err());
    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Failed);
    assert!(
        rows[0]
            .exception_message
            .as_deref()
            .unwrap()
            .starts_with("ConnectionFailed: Failed to connect to 127.0.0.1:1")
    );
}

#[tokio::test]
async fn test_structured_failure_falls_back_to_direct_insert() {
    let store = TestStore::new();
    store.fail_structured(true);
    let scope = scope_with(&store, configured());
    let mailer =
        Mailer::new(scope.instrument(MemoryTransport::new())).with_listener(scope.tracker());

    scope
        .run(async { mailer.send(&invoice("Invoice #42")).await })
        .await
        .unwrap();

    assert_eq!(store.structured_writes(), 0);
    assert_eq!(store.direct_writes(), 1);

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Sent);
    assert_eq!(rows[0].subject, "Invoice #42");
    assert_eq!(rows[0].sender_address, "billing@example.com");
    assert_eq!(rows[0].mailjet_enabled, 1);
    assert_eq!(rows[0].tstamp, rows[0].crdate);
}

#[tokio::test]
async fn test_same_subject_retires_oldest_attempt_only() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::ConnectionClosed);
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    assert!(mailer.send(&invoice("Weekly digest")).await.is_err());
    let pending = scope.context().ledger().pending();
    assert_eq!(pending.len(), 1);

    mailer.send(&invoice("Weekly digest")).await.unwrap();

    // The success retired the first registered attempt, leaving the second
    let remaining = scope.context().ledger().pending();
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id(), pending[0].id());

    assert_eq!(scope.finish(), 1);

    let rows = store.rows();
    assert_eq!(by_status(&rows, DeliveryStatus::Sent).len(), 1);
    assert_eq!(by_status(&rows, DeliveryStatus::Failed).len(), 1);
}

struct AdvanceClockAfterSend(TestClock, Duration);

impl MailEventListener for AdvanceClockAfterSend {
    fn before_send(&self, _event: &BeforeSendEvent<'_>) {}

    fn after_send(&self, _event: &AfterSendEvent<'_>) {
        self.0.advance(self.1);
    }
}

#[tokio::test]
async fn test_success_outside_window_is_not_correlated() {
    let store = TestStore::new();
    let clock = TestClock::default();
    let scope = DeliveryScope::with_clock(
        PersistenceGateway::from_store(Arc::new(store.clone())),
        Arc::new(configured()),
        TrackerConfig::default(),
        Arc::new(clock.clone()),
    );
    let mailer = Mailer::new(scope.instrument(MemoryTransport::new()))
        .with_listener(Arc::new(AdvanceClockAfterSend(clock, Duration::from_secs(6))))
        .with_listener(scope.tracker());

    mailer.send(&invoice("Slow relay")).await.unwrap();
    assert_eq!(scope.finish(), 1);

    let rows = store.rows();
    assert_eq!(by_status(&rows, DeliveryStatus::Sent).len(), 1);
    let failed = by_status(&rows, DeliveryStatus::Failed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].exception_message.as_deref(), Some(INCOMPLETE_MESSAGE));
}

#[tokio::test]
async fn test_long_fields_are_truncated() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let mailer =
        Mailer::new(scope.instrument(MemoryTransport::new())).with_listener(scope.tracker());

    let subject = "é".repeat(1200);
    let sender = format!("{}@example.com", "a".repeat(300));
    let message = OutgoingMessage::builder()
        .from(sender.as_str())
        .to("customer@example.org")
        .subject(subject.as_str())
        .build();

    mailer.send(&message).await.unwrap();
    assert_eq!(scope.finish(), 0);

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].subject.chars().count(), 998);
    assert_eq!(rows[0].sender_address.chars().count(), 255);
}

#[tokio::test]
async fn test_mailjet_flag_requires_all_settings() {
    for (settings, expected) in [
        (configured(), 1),
        (
            MailjetSettings {
                smtp_password: String::new(),
                ..configured()
            },
            0,
        ),
        (
            MailjetSettings {
                smtp_server: String::new(),
                ..configured()
            },
            0,
        ),
    ] {
        let store = TestStore::new();
        let scope = scope_with(&store, settings);
        let mailer =
            Mailer::new(scope.instrument(MemoryTransport::new())).with_listener(scope.tracker());

        mailer.send(&invoice("Invoice #42")).await.unwrap();

        assert_eq!(store.rows()[0].mailjet_enabled, expected);
    }
}

#[tokio::test]
async fn test_unreadable_settings_mean_disabled() {
    let store = TestStore::new();
    let scope = scope_with(&store, RonSettingsFile::new("/nonexistent/mailjet.ron"));
    let mailer =
        Mailer::new(scope.instrument(MemoryTransport::new())).with_listener(scope.tracker());

    mailer.send(&invoice("Invoice #42")).await.unwrap();

    assert_eq!(store.rows()[0].mailjet_enabled, 0);
}

#[tokio::test]
async fn test_panicking_send_is_recorded_and_propagated() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.panic_next();
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    let joined = tokio::spawn(async move {
        scope
            .run(async { mailer.send(&invoice("Invoice #42")).await })
            .await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Failed);
    let message = rows[0].exception_message.as_deref().unwrap();
    assert!(
        message.starts_with("Fatal error: memory transport crashed while sending in "),
        "{message}"
    );
    assert!(message.contains(" on line "), "{message}");
}

#[tokio::test]
async fn test_scope_reconciles_once() {
    let store = TestStore::new();
    {
        let scope = scope_with(&store, configured());
        let transport = MemoryTransport::new();
        transport.fail_next(TransportError::ConnectionClosed);
        let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

        let result = scope
            .run(async { mailer.send(&invoice("Invoice #42")).await })
            .await;
        assert!(result.is_err());
        assert_eq!(scope.finish(), 0);
    }

    assert_eq!(store.rows().len(), 1);
}

#[tokio::test]
async fn test_drop_reconciles_pending_attempts() {
    let store = TestStore::new();
    {
        let scope = scope_with(&store, configured());
        let transport = MemoryTransport::new();
        transport.fail_next(TransportError::Timeout("DATA"));
        let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

        assert!(mailer.send(&invoice("Invoice #42")).await.is_err());
    }

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].exception_message.as_deref(),
        Some("Timeout: Timed out during DATA")
    );
}

#[tokio::test]
async fn test_no_pending_attempts_writes_nothing() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());

    assert_eq!(scope.finish(), 0);
    drop(scope);

    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_fatal_errors_without_capture() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::ConnectionClosed);
    // Not instrumented: no captured failure to read
    let mailer = Mailer::new(transport).with_listener(scope.tracker());

    assert!(mailer.send(&invoice("Invoice #42")).await.is_err());
    scope.report_fatal(FatalError::new(
        FatalKind::Error,
        "Allowed memory size exhausted",
        "src/reports.rs",
        88,
    ));
    scope.report_fatal(FatalError::new(
        FatalKind::Notice,
        "Undefined index: foo",
        "src/reports.rs",
        90,
    ));
    scope.finish();

    // The notice replaced the fatal error as the last error, and is ignored
    assert_eq!(
        store.rows()[0].exception_message.as_deref(),
        Some(INCOMPLETE_MESSAGE)
    );
}

#[tokio::test]
async fn test_fatal_error_diagnostic() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::ConnectionClosed);
    let mailer = Mailer::new(transport).with_listener(scope.tracker());

    assert!(mailer.send(&invoice("Invoice #42")).await.is_err());
    scope.report_fatal(FatalError::new(
        FatalKind::Compile,
        "Cannot redeclare function",
        "src/reports.rs",
        12,
    ));
    scope.finish();

    assert_eq!(
        store.rows()[0].exception_message.as_deref(),
        Some("Compile error: Cannot redeclare function in src/reports.rs on line 12")
    );
}

#[tokio::test]
async fn test_persistence_failures_never_reach_the_caller() {
    let store = TestStore::new();
    store.fail_structured(true);
    store.fail_direct(true);
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::ConnectionClosed);
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    let failed = mailer.send(&invoice("First")).await;
    let sent = mailer.send(&invoice("Second")).await;

    assert!(matches!(failed, Err(TransportError::ConnectionClosed)));
    assert!(sent.is_ok());
    assert_eq!(scope.finish(), 0);
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_panicking_store_never_reaches_the_caller() {
    let store = TestStore::new();
    store.panic_on_write(true);
    let scope = scope_with(&store, configured());
    let mailer =
        Mailer::new(scope.instrument(MemoryTransport::new())).with_listener(scope.tracker());

    let sent = mailer.send(&invoice("Invoice #42")).await;

    assert!(sent.is_ok());
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_earlier_failure_survives_later_successful_send() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::ConnectionClosed);
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    assert!(mailer.send(&invoice("First")).await.is_err());
    assert!(!scope.context().failure_slot().is_empty());

    mailer.send(&invoice("Second")).await.unwrap();
    assert!(scope.context().failure_slot().is_empty());

    let pending = scope.context().ledger().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].failure().unwrap().kind(), "ConnectionClosed");

    assert_eq!(scope.finish(), 1);
    let rows = store.rows();
    let failed = by_status(&rows, DeliveryStatus::Failed);
    assert_eq!(failed[0].subject, "First");
    assert_eq!(
        failed[0].exception_message.as_deref(),
        Some("ConnectionClosed: Connection closed unexpectedly")
    );
}

#[tokio::test]
async fn test_each_failed_send_keeps_its_own_diagnostic() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    let mailer =
        Mailer::new(scope.instrument(transport.clone())).with_listener(scope.tracker());

    transport.fail_next(TransportError::SmtpRejected {
        code: 550,
        message: "Mailbox unavailable for first".to_string(),
    });
    assert!(mailer.send(&invoice("First")).await.is_err());

    transport.fail_next(TransportError::Timeout("DATA"));
    assert!(mailer.send(&invoice("Second")).await.is_err());

    assert_eq!(scope.finish(), 2);

    let rows = store.rows();
    let diagnostic = |subject: &str| {
        rows.iter()
            .find(|row| row.subject == subject)
            .and_then(|row| row.exception_message.clone())
    };
    assert_eq!(
        diagnostic("First").as_deref(),
        Some("SmtpRejected: SMTP error: 550 - Mailbox unavailable for first")
    );
    assert_eq!(
        diagnostic("Second").as_deref(),
        Some("Timeout: Timed out during DATA")
    );
}

#[tokio::test]
async fn test_send_after_finish_is_reconciled() {
    let store = TestStore::new();
    {
        let scope = scope_with(&store, configured());
        let transport = MemoryTransport::new();
        let mailer =
            Mailer::new(scope.instrument(transport.clone())).with_listener(scope.tracker());

        mailer.send(&invoice("Before finish")).await.unwrap();
        assert_eq!(scope.finish(), 0);
        assert!(scope.context().reconciled());

        transport.fail_next(TransportError::ConnectionClosed);
        assert!(mailer.send(&invoice("After finish")).await.is_err());
        assert_eq!(scope.context().ledger().len(), 1);
        assert!(!scope.context().reconciled());
    }

    let rows = store.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].subject, "Before finish");
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Sent);
    assert_eq!(rows[1].subject, "After finish");
    assert_eq!(rows[1].delivery_status, DeliveryStatus::Failed);
    assert_eq!(
        rows[1].exception_message.as_deref(),
        Some("ConnectionClosed: Connection closed unexpectedly")
    );
}

#[tokio::test]
async fn test_finish_after_late_send_reconciles_again() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    let mailer =
        Mailer::new(scope.instrument(transport.clone())).with_listener(scope.tracker());

    transport.fail_next(TransportError::ConnectionClosed);
    assert!(mailer.send(&invoice("First batch")).await.is_err());
    assert_eq!(scope.finish(), 1);
    assert_eq!(scope.finish(), 0);

    transport.fail_next(TransportError::ConnectionClosed);
    assert!(mailer.send(&invoice("Second batch")).await.is_err());
    assert_eq!(scope.finish(), 1);
    assert_eq!(scope.finish(), 0);

    assert_eq!(by_status(&store.rows(), DeliveryStatus::Failed).len(), 2);
}

#[tokio::test]
async fn test_caller_recording() {
    let store = TestStore::new();
    let scope = DeliveryScope::new(
        PersistenceGateway::from_store(Arc::new(store.clone())),
        Arc::new(configured()),
        TrackerConfig {
            record_caller: true,
            ..TrackerConfig::default()
        },
    );
    let transport = MemoryTransport::new();
    transport.fail_next(TransportError::ConnectionClosed);
    let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

    assert!(mailer.send(&invoice("Invoice #42")).await.is_err());

    let pending = scope.context().ledger().pending();
    let caller = pending[0].caller().unwrap();
    assert!(!caller.is_empty());
}

#[tokio::test]
async fn test_context_reset_between_units_of_work() {
    let store = TestStore::new();
    let scope = scope_with(&store, configured());
    let transport = MemoryTransport::new();
    let mailer =
        Mailer::new(scope.instrument(transport.clone())).with_listener(scope.tracker());

    transport.fail_next(TransportError::ConnectionClosed);
    assert!(mailer.send(&invoice("First job")).await.is_err());
    assert_eq!(scope.finish(), 1);

    scope.context().reset();

    transport.fail_next(TransportError::ConnectionClosed);
    assert!(mailer.send(&invoice("Second job")).await.is_err());
    assert_eq!(scope.finish(), 1);

    let subjects: Vec<_> = store.rows().into_iter().map(|row| row.subject).collect();
    assert_eq!(subjects, vec!["First job".to_string(), "Second job".to_string()]);
}
