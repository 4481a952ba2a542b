use std::sync::atomic::{AtomicBool, Ordering};

use mailtrail_common::internal;
use mailtrail_transport::FailureSlot;
use parking_lot::Mutex;

use crate::{fatal::FatalError, ledger::AttemptLedger};

/// State of one execution context: one request, one job, one CLI run.
///
/// Hooks and the reconciler share a context through an `Arc`. A worker that
/// serves many units of work either creates a context per unit or calls
/// [`TrackingContext::reset`] between them; nothing here is process-global.
#[derive(Debug, Default)]
pub struct TrackingContext {
    ledger: AttemptLedger,
    failure_slot: FailureSlot,
    last_fatal: Mutex<Option<FatalError>>,
    capture_installed: AtomicBool,
    reconciler_armed: AtomicBool,
    reconciled: AtomicBool,
}

impl TrackingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    /// The slot a capture wrapper for this context writes into
    #[must_use]
    pub const fn failure_slot(&self) -> &FailureSlot {
        &self.failure_slot
    }

    /// Remember `fatal` as the most recent runtime error.
    pub fn record_fatal(&self, fatal: FatalError) {
        internal!(level = DEBUG, "Fatal error recorded: {}", fatal);
        *self.last_fatal.lock() = Some(fatal);
    }

    #[must_use]
    pub fn last_fatal(&self) -> Option<FatalError> {
        self.last_fatal.lock().clone()
    }

    /// Returns `true` the first time only.
    pub fn mark_capture_installed(&self) -> bool {
        !self.capture_installed.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn capture_installed(&self) -> bool {
        self.capture_installed.load(Ordering::SeqCst)
    }

    /// Returns `true` the first time only.
    pub fn arm_reconciler(&self) -> bool {
        !self.reconciler_armed.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn reconciler_armed(&self) -> bool {
        self.reconciler_armed.load(Ordering::SeqCst)
    }

    /// Claim the single reconciliation of this context.
    pub(crate) fn begin_reconcile(&self) -> bool {
        !self.reconciled.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn reconciled(&self) -> bool {
        self.reconciled.load(Ordering::SeqCst)
    }

    /// Allow another reconciliation after new work arrived in a context that
    /// was already finalised. Returns `true` if the context had been
    /// reconciled.
    pub(crate) fn reopen(&self) -> bool {
        self.reconciled.swap(false, Ordering::SeqCst)
    }

    /// Forget everything so the context can serve another unit of work.
    ///
    /// The capture-installed flag survives: the wrapper built at wiring
    /// time keeps writing into the same slot.
    pub fn reset(&self) {
        let abandoned = self.ledger.drain_all().len();
        if abandoned > 0 {
            internal!(
                level = WARN,
                "Discarding {} pending attempt(s) on context reset",
                abandoned
            );
        }

        self.failure_slot.clear();
        self.last_fatal.lock().take();
        self.reconciler_armed.store(false, Ordering::SeqCst);
        self.reconciled.store(false, Ordering::SeqCst);
    }
}
