//! Exit-time reconciliation.
//!
//! Every attempt still pending when an execution context ends is written as
//! a `failed` record, with the best diagnostic available:
//!
//! 1. the failure captured by the transport wrapper for that attempt's own
//!    send (or, failing that, the context's last captured failure),
//!    `"<kind>: <message>"` or `"<kind> thrown"` when the message is too
//!    short to be useful,
//! 2. the last fatal-class runtime error,
//! 3. a generic message.
//!
//! Reconciliation runs while the process may already be failing, so it
//! never returns an error and never lets a panic out.

use std::panic::{AssertUnwindSafe, catch_unwind};

use mailtrail_common::{audit, internal, outgoing};
use mailtrail_store::{DeliveryRecord, PersistenceGateway};
use mailtrail_transport::CapturedFailure;
use tracing::warn;

use crate::{clock::Clock, context::TrackingContext, fatal::FatalError};

/// Used when neither a captured failure nor a fatal error explains the outcome
pub const INCOMPLETE_MESSAGE: &str = "Email sending did not complete successfully";

/// Captured messages shorter than this are replaced by `"<kind> thrown"`
const MIN_MESSAGE_LENGTH: usize = 10;

/// Pick the exception message for attempts that never concluded.
#[must_use]
pub fn diagnostic(failure: Option<&CapturedFailure>, fatal: Option<&FatalError>) -> String {
    if let Some(failure) = failure {
        let message = failure.message().trim();
        return if message.chars().count() < MIN_MESSAGE_LENGTH {
            format!("{} thrown", failure.kind())
        } else {
            format!("{}: {}", failure.kind(), message)
        };
    }

    if let Some(fatal) = fatal
        && fatal.kind.is_fatal()
    {
        return fatal.to_string();
    }

    INCOMPLETE_MESSAGE.to_string()
}

/// Writes `failed` records for whatever a context left pending.
pub struct Reconciler<'a> {
    context: &'a TrackingContext,
    gateway: &'a PersistenceGateway,
    clock: &'a dyn Clock,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub const fn new(
        context: &'a TrackingContext,
        gateway: &'a PersistenceGateway,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            context,
            gateway,
            clock,
        }
    }

    /// Finalise the context. Returns the number of `failed` records written.
    ///
    /// Runs once per context unless a new attempt is registered afterwards,
    /// which reopens it.
    pub fn reconcile(&self) -> usize {
        if !self.context.reconciler_armed() || !self.context.begin_reconcile() {
            return 0;
        }

        match catch_unwind(AssertUnwindSafe(|| self.finalise_pending())) {
            Ok(written) => written,
            Err(_) => {
                warn!("Reconciliation panicked; remaining attempts were not recorded");
                0
            }
        }
    }

    fn finalise_pending(&self) -> usize {
        // The last send's failure belongs to its own attempt when one matches;
        // otherwise it explains every attempt without a failure of its own.
        let unattributed = self
            .context
            .failure_slot()
            .take()
            .and_then(|failure| self.context.ledger().attach_failure(failure));

        let pending = self.context.ledger().drain_all();
        if pending.is_empty() {
            return 0;
        }

        let fatal = self.context.last_fatal();

        internal!(
            level = DEBUG,
            "Reconciling {} pending attempt(s)",
            pending.len()
        );

        let mut written = 0;
        for attempt in &pending {
            let message = diagnostic(
                attempt.failure().or(unattributed.as_ref()),
                fatal.as_ref(),
            );
            let record = DeliveryRecord::failed(
                self.clock.now(),
                attempt.mailjet_enabled(),
                attempt.subject(),
                attempt.sender_address(),
                message.as_str(),
            );

            match catch_unwind(AssertUnwindSafe(|| self.gateway.record(&record))) {
                Ok(Ok(path)) => {
                    written += 1;
                    outgoing!(
                        level = DEBUG,
                        "Recorded failed attempt {} via {:?} path",
                        attempt.id(),
                        path
                    );
                }
                Ok(Err(err)) => {
                    warn!(attempt = %attempt.id(), error = %err, "Could not record failed attempt");
                }
                Err(_) => {
                    warn!(attempt = %attempt.id(), "Persistence panicked while recording failed attempt");
                }
            }

            audit::log_delivery_failed(
                &attempt.id().to_string(),
                attempt.sender_address(),
                attempt.subject(),
                &message,
            );
        }

        written
    }
}
