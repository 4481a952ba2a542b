//! Durable delivery records for outbound email
//!
//! This crate wires the pieces together: the RON configuration document,
//! the delivery store, and a [`Mailer`](mailtrail_transport::Mailer) whose
//! transport is instrumented and whose sends are tracked by a
//! [`DeliveryScope`](mailtrail_tracker::DeliveryScope).

pub mod controller;

pub use controller::{Mailtrail, SendOutcome};
