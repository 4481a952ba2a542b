//! Field extraction for delivery records.
//!
//! Every function here degrades to an empty string instead of failing. A
//! view is consulted first, then the message it wraps (if any); the first
//! non-empty value wins.

use crate::message::MessageView;

/// Longest subject a delivery record can hold (RFC 5322 line limit)
pub const MAX_SUBJECT_LENGTH: usize = 998;

/// Longest sender address a delivery record can hold
pub const MAX_ADDRESS_LENGTH: usize = 255;

/// Truncate to at most `max_chars` Unicode scalar values.
#[must_use]
pub fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((end, _)) => value[..end].to_string(),
        None => value.to_string(),
    }
}

fn first_non_empty<'a>(
    view: &'a dyn MessageView,
    field: impl Fn(&'a dyn MessageView) -> Option<String>,
) -> String {
    field(view)
        .filter(|value| !value.is_empty())
        .or_else(|| view.original().and_then(&field))
        .filter(|value| !value.is_empty())
        .unwrap_or_default()
}

/// The subject, truncated to [`MAX_SUBJECT_LENGTH`] characters.
#[must_use]
pub fn extract_subject(view: &dyn MessageView) -> String {
    let subject = first_non_empty(view, |view| view.subject().map(str::to_string));
    truncate(&subject, MAX_SUBJECT_LENGTH)
}

/// The first `From` address, truncated to [`MAX_ADDRESS_LENGTH`] characters.
#[must_use]
pub fn extract_sender_address(view: &dyn MessageView) -> String {
    let sender = first_non_empty(view, |view| {
        view.from_addresses()
            .first()
            .map(|mailbox| mailbox.address.clone())
    });
    truncate(&sender, MAX_ADDRESS_LENGTH)
}

/// Every `To` address, sorted and comma-joined.
#[must_use]
pub fn extract_recipients(view: &dyn MessageView) -> String {
    first_non_empty(view, |view| {
        let mut addresses: Vec<&str> = view
            .to_addresses()
            .iter()
            .map(|mailbox| mailbox.address.as_str())
            .collect();
        addresses.sort_unstable();
        Some(addresses.join(","))
    })
}
