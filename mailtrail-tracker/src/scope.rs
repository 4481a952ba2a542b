//! The execution scope: wiring plus a guaranteed final reconciliation.
//!
//! A [`DeliveryScope`] owns one [`TrackingContext`]. Build the transport
//! through [`DeliveryScope::instrument`], register [`DeliveryScope::tracker`]
//! on the mailer, then do the work inside [`DeliveryScope::run`] (or call
//! [`DeliveryScope::finish`] yourself). Whatever happens, the scope
//! reconciles: at the end of `run`, on `finish`, or when it is dropped,
//! including while unwinding from a panic. Reconciliation runs once unless
//! the mailer is used again afterwards, in which case the next `finish` or
//! the drop picks up the new attempts.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mailtrail_common::{OutgoingMessage, config::MailjetSettings};
//! # use mailtrail_store::{MemoryStore, PersistenceGateway};
//! # use mailtrail_tracker::{DeliveryScope, TrackerConfig};
//! # use mailtrail_transport::{Mailer, MemoryTransport};
//! # async fn example(message: OutgoingMessage) {
//! let gateway = PersistenceGateway::from_store(Arc::new(MemoryStore::new()));
//! let scope = DeliveryScope::new(gateway, Arc::new(MailjetSettings::default()), TrackerConfig::default());
//!
//! let mailer = Mailer::new(scope.instrument(MemoryTransport::new()))
//!     .with_listener(scope.tracker());
//!
//! let outcome = scope.run(async { mailer.send(&message).await }).await;
//! # }
//! ```

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use mailtrail_common::{config::SettingsSource, internal};
use mailtrail_store::PersistenceGateway;
use mailtrail_transport::{CaptureTransport, Transport};

use crate::{
    clock::{Clock, SystemClock},
    config::TrackerConfig,
    context::TrackingContext,
    fatal::{self, FatalError},
    reconciler::Reconciler,
    tracker::DeliveryTracker,
};

pub struct DeliveryScope {
    context: Arc<TrackingContext>,
    gateway: Arc<PersistenceGateway>,
    clock: Arc<dyn Clock>,
    tracker: Arc<DeliveryTracker>,
}

impl std::fmt::Debug for DeliveryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryScope")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl DeliveryScope {
    #[must_use]
    pub fn new(
        gateway: PersistenceGateway,
        settings: Arc<dyn SettingsSource>,
        config: TrackerConfig,
    ) -> Self {
        Self::with_clock(gateway, settings, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        gateway: PersistenceGateway,
        settings: Arc<dyn SettingsSource>,
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        fatal::install_panic_hook();

        let context = Arc::new(TrackingContext::new());
        let gateway = Arc::new(gateway);
        let tracker = Arc::new(DeliveryTracker::new(
            Arc::clone(&context),
            Arc::clone(&gateway),
            settings,
            Arc::clone(&clock),
            config,
        ));

        Self {
            context,
            gateway,
            clock,
            tracker,
        }
    }

    /// Wrap `transport` so its failures are visible to this scope.
    pub fn instrument<T: Transport>(&self, transport: T) -> CaptureTransport<T> {
        if !self.context.mark_capture_installed() {
            internal!(
                level = DEBUG,
                "Instrumenting {} for a scope that already has a capture wrapper",
                transport.describe()
            );
        }

        CaptureTransport::new(transport, self.context.failure_slot().clone())
    }

    /// The listener to register on the mailer
    #[must_use]
    pub fn tracker(&self) -> Arc<DeliveryTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<TrackingContext> {
        &self.context
    }

    /// Record a runtime error that may explain sends that never concluded.
    pub fn report_fatal(&self, fatal: FatalError) {
        self.context.record_fatal(fatal);
    }

    /// Run `work`, then reconcile. A panic in `work` is recorded, the scope
    /// is reconciled, and the panic is resumed.
    pub async fn run<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(output) => {
                self.finish();
                output
            }
            Err(payload) => {
                let fatal = fatal::take_last_panic()
                    .unwrap_or_else(|| FatalError::from_panic_payload(payload.as_ref()));
                self.context.record_fatal(fatal);
                self.finish();
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Reconcile now. Returns the number of `failed` records written; later
    /// calls (and the drop) do nothing until another attempt is registered.
    pub fn finish(&self) -> usize {
        Reconciler::new(&self.context, &self.gateway, self.clock.as_ref()).reconcile()
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        if std::thread::panicking()
            && let Some(fatal) = fatal::take_last_panic()
        {
            self.context.record_fatal(fatal);
        }

        let written = self.finish();
        if written > 0 {
            internal!(
                level = DEBUG,
                "Scope dropped with {} unfinished attempt(s)",
                written
            );
        }
    }
}
