//! Pre-send and post-send hooks.
//!
//! [`DeliveryTracker`] listens to a [`Mailer`](mailtrail_transport::Mailer).
//! Before a send it registers a pending attempt; after a successful send it
//! writes the `sent` record and retires the attempt. Neither hook can fail
//! or panic into the sending path.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use mailtrail_common::{
    OutgoingMessage, audit,
    caller::{capture_frames, identify_caller},
    config::{SettingsSource, mailjet_enabled},
    extract::{extract_recipients, extract_sender_address, extract_subject},
    internal, outgoing,
};
use mailtrail_store::{DeliveryRecord, PersistenceGateway};
use mailtrail_transport::{AfterSendEvent, BeforeSendEvent, MailEventListener};
use tracing::warn;

use crate::{
    clock::Clock, config::TrackerConfig, context::TrackingContext, ledger::AttemptDraft,
};

pub struct DeliveryTracker {
    context: Arc<TrackingContext>,
    gateway: Arc<PersistenceGateway>,
    settings: Arc<dyn SettingsSource>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl std::fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("pending", &self.context.ledger().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryTracker {
    #[must_use]
    pub fn new(
        context: Arc<TrackingContext>,
        gateway: Arc<PersistenceGateway>,
        settings: Arc<dyn SettingsSource>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            context,
            gateway,
            settings,
            clock,
            config,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<TrackingContext> {
        &self.context
    }

    /// Hand the previous send's captured failure to its own attempt before
    /// the next send overwrites the slot.
    fn settle_previous_failure(&self) {
        let Some(failure) = self.context.failure_slot().take() else {
            return;
        };

        if let Some(unmatched) = self.context.ledger().attach_failure(failure) {
            internal!(
                level = DEBUG,
                "No pending attempt for failed message '{}'",
                extract_subject(unmatched.failed_message())
            );
        }
    }

    fn register_attempt(&self, message: &OutgoingMessage) {
        self.settle_previous_failure();

        let subject = extract_subject(message);
        let sender_address = extract_sender_address(message);
        let recipients = extract_recipients(message);
        let identity = message
            .message_id()
            .map_or_else(|| format!("{:p}", std::ptr::from_ref(message)), str::to_string);
        let caller = self
            .config
            .record_caller
            .then(|| identify_caller(&capture_frames()));

        let id = self.context.ledger().register(
            AttemptDraft {
                subject: subject.clone(),
                sender_address: sender_address.clone(),
                recipients: recipients.clone(),
                mailjet_enabled: mailjet_enabled(self.settings.as_ref()),
                identity,
                caller: caller.clone(),
            },
            self.clock.now(),
        );

        audit::log_attempt_registered(
            &id.to_string(),
            &sender_address,
            &recipients,
            &subject,
            caller.as_deref(),
        );

        if self.context.reopen() {
            internal!(
                level = DEBUG,
                "Attempt {} registered after reconciliation; reconciling again at the end",
                id
            );
        }

        if self.context.arm_reconciler() {
            internal!(level = DEBUG, "Reconciler armed for this execution context");

            if !self.context.capture_installed() {
                internal!(
                    level = WARN,
                    "Transport is not instrumented; failures will only be diagnosed from fatal errors"
                );
            }
        }
    }

    fn record_sent(&self, event: &AfterSendEvent<'_>) {
        let subject = extract_subject(event.sent);
        let sender_address = extract_sender_address(event.sent);
        let mailjet_enabled = mailjet_enabled(self.settings.as_ref());
        let now = self.clock.now();

        let record = DeliveryRecord::sent(now, mailjet_enabled, &subject, &sender_address);
        match self.gateway.record(&record) {
            Ok(path) => outgoing!(
                level = DEBUG,
                "Recorded sent message {} via {:?} path",
                event.sent.message_id(),
                path
            ),
            Err(err) => warn!(error = %err, "Could not record sent message"),
        }

        let retired = self.context.ledger().retire_by_subject_and_window(
            &subject,
            self.config.correlation_window(),
            now,
        );
        if retired.is_none() {
            internal!(
                level = DEBUG,
                "No pending attempt matched sent message {}",
                event.sent.message_id()
            );
        }

        audit::log_delivery_sent(&sender_address, &subject, mailjet_enabled, retired.is_some());
    }
}

impl MailEventListener for DeliveryTracker {
    fn before_send(&self, event: &BeforeSendEvent<'_>) {
        let Some(mailer) = event.mailer.introspection() else {
            internal!("Ignoring pre-send event from an uninstrumented mailer");
            return;
        };
        let Some(message) = event.message else {
            return;
        };

        internal!(
            "Pre-send notification from {}",
            mailer.transport_name()
        );

        if catch_unwind(AssertUnwindSafe(|| self.register_attempt(message))).is_err() {
            warn!("Pre-send hook panicked; attempt was not registered");
        }
    }

    fn after_send(&self, event: &AfterSendEvent<'_>) {
        if event.mailer.introspection().is_none() {
            internal!("Ignoring post-send event from an uninstrumented mailer");
            return;
        }

        if catch_unwind(AssertUnwindSafe(|| self.record_sent(event))).is_err() {
            warn!("Post-send hook panicked; sent message was not recorded");
        }
    }
}
