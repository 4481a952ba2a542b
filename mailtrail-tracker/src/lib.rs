//! Delivery attempt tracking
//!
//! This crate turns the two notifications a [`Mailer`] emits around each
//! send into exactly one durable delivery record per attempt:
//! - the pre-send hook registers a pending attempt in the [`AttemptLedger`]
//! - the post-send hook writes a `sent` record and retires the attempt
//! - when the [`DeliveryScope`] ends, the [`Reconciler`] writes a `failed`
//!   record for every attempt that never concluded
//!
//! [`Mailer`]: mailtrail_transport::Mailer

pub mod clock;
pub mod config;
pub mod context;
pub mod fatal;
pub mod id;
pub mod ledger;
pub mod reconciler;
mod scope;
mod tracker;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::TrackerConfig;
pub use context::TrackingContext;
pub use fatal::{FatalError, FatalKind};
pub use id::AttemptId;
pub use ledger::{AttemptDraft, AttemptLedger, PendingAttempt};
pub use reconciler::{INCOMPLETE_MESSAGE, Reconciler};
pub use scope::DeliveryScope;
pub use tracker::DeliveryTracker;
