//! The attempt ledger: sends that have started but not yet concluded.
//!
//! Entries are kept in registration order. A successful send retires its
//! attempt through [`AttemptLedger::retire_by_subject_and_window`]; whatever
//! is left when the execution context ends is drained by the reconciler and
//! reported as failed.
//!
//! # Correlation
//!
//! The mail subsystem gives no identifier linking its pre-send and post-send
//! notifications, so a success is matched to an attempt by exact subject
//! within a time window. When several pending attempts share a subject
//! inside the window the oldest one is retired. This can attribute a
//! success to the wrong attempt when the same subject is sent concurrently
//! (templated or bulk mail); the number of `sent` and `failed` records still
//! adds up, but which attempt a failure belongs to cannot be told apart.
//!
//! A captured transport failure is attached to the newest pending attempt
//! with the failed message's subject, so several failed sends in one
//! context each keep their own diagnostic.

use std::time::{Duration, SystemTime};

use mailtrail_common::extract::{
    MAX_ADDRESS_LENGTH, MAX_SUBJECT_LENGTH, extract_subject, truncate,
};
use mailtrail_transport::CapturedFailure;
use parking_lot::Mutex;

use crate::id::AttemptId;

/// What the pre-send hook knows about a send about to happen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptDraft {
    pub subject: String,
    pub sender_address: String,
    pub recipients: String,
    pub mailjet_enabled: bool,
    /// Anything identifying the message instance, such as its Message-ID
    pub identity: String,
    pub caller: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttempt {
    id: AttemptId,
    subject: String,
    sender_address: String,
    recipients: String,
    created_at: SystemTime,
    mailjet_enabled: bool,
    caller: Option<String>,
    failure: Option<CapturedFailure>,
}

impl PendingAttempt {
    #[must_use]
    pub const fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    #[must_use]
    pub fn recipients(&self) -> &str {
        &self.recipients
    }

    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub const fn mailjet_enabled(&self) -> bool {
        self.mailjet_enabled
    }

    #[must_use]
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// The transport failure of this attempt's own send, if it was captured
    #[must_use]
    pub const fn failure(&self) -> Option<&CapturedFailure> {
        self.failure.as_ref()
    }

    fn within(&self, now: SystemTime, window: Duration) -> bool {
        let distance = now
            .duration_since(self.created_at)
            .unwrap_or_else(|err| err.duration());
        distance <= window
    }
}

#[derive(Debug, Default)]
pub struct AttemptLedger {
    entries: Mutex<Vec<PendingAttempt>>,
}

impl AttemptLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending attempt and return its id.
    pub fn register(&self, draft: AttemptDraft, now: SystemTime) -> AttemptId {
        let mut entries = self.entries.lock();

        let mut id = AttemptId::generate(now, &draft.subject, &draft.identity);
        while entries.iter().any(|entry| entry.id == id) {
            id = AttemptId::generate(now, &draft.subject, &draft.identity);
        }

        entries.push(PendingAttempt {
            id,
            subject: truncate(&draft.subject, MAX_SUBJECT_LENGTH),
            sender_address: truncate(&draft.sender_address, MAX_ADDRESS_LENGTH),
            recipients: draft.recipients,
            created_at: now,
            mailjet_enabled: draft.mailjet_enabled,
            caller: draft.caller,
            failure: None,
        });

        id
    }

    /// Remove the oldest attempt with exactly `subject` registered within
    /// `window` of `now`.
    pub fn retire_by_subject_and_window(
        &self,
        subject: &str,
        window: Duration,
        now: SystemTime,
    ) -> Option<PendingAttempt> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|entry| entry.subject == subject && entry.within(now, window))?;

        Some(entries.remove(index))
    }

    /// Attach `failure` to the newest pending attempt for the failed
    /// message's subject that has no failure yet. The failure is handed back
    /// when no attempt matches.
    pub fn attach_failure(&self, failure: CapturedFailure) -> Option<CapturedFailure> {
        let subject = extract_subject(failure.failed_message());
        let mut entries = self.entries.lock();

        match entries
            .iter_mut()
            .rev()
            .find(|entry| entry.subject == subject && entry.failure.is_none())
        {
            Some(entry) => {
                entry.failure = Some(failure);
                None
            }
            None => Some(failure),
        }
    }

    /// Empty the ledger, returning every pending attempt in registration order
    pub fn drain_all(&self) -> Vec<PendingAttempt> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Snapshot of the pending attempts
    #[must_use]
    pub fn pending(&self) -> Vec<PendingAttempt> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
