//! Attempt identifiers.
//!
//! An attempt id is a ULID: the timestamp part is the wall clock at
//! registration and the 80 random bits are a keyed hash of everything that
//! distinguishes one attempt from another (subject, message identity, a
//! high-resolution timestamp and a process-wide counter). Keys are drawn
//! once per process, so ids are not predictable across runs.

use std::{
    fmt,
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use ulid::Ulid;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn hasher() -> &'static ahash::RandomState {
    static STATE: OnceLock<ahash::RandomState> = OnceLock::new();
    STATE.get_or_init(ahash::RandomState::new)
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(Ulid);

impl AttemptId {
    /// Derive a fresh id. Never fails; two calls never share inputs
    /// because of the counter.
    #[must_use]
    pub fn generate(now: SystemTime, subject: &str, identity: &str) -> Self {
        let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        let high_resolution = process_start().elapsed().as_nanos();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);

        let state = hasher();
        let high = state.hash_one((
            since_epoch.as_secs(),
            subject,
            identity,
            high_resolution,
            sequence,
        ));
        let low = state.hash_one((high, sequence));

        let millis = u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX);
        Self(Ulid::from_parts(
            millis,
            (u128::from(high) << 64) | u128::from(low),
        ))
    }

    #[must_use]
    pub const fn ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
