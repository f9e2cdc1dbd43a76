//! Mailbox selection.
//!
//! Pure functions over a snapshot of the pool: filter to selectable
//! mailboxes, then prefer the lowest `priority`, then the lowest
//! `sent_count_window`, then the lowest `id` so the pick is deterministic.

use chrono::{DateTime, Utc};

use crate::mailbox::Mailbox;

/// Picks the next mailbox to send through, or `None` when nothing is
/// selectable at `now`.
#[must_use]
pub fn select_mailbox(pool: &[Mailbox], now: DateTime<Utc>) -> Option<&Mailbox> {
    select_mailbox_excluding::<&str>(pool, now, &[])
}

/// Like [`select_mailbox`], also skipping the ids in `skip`.
#[must_use]
pub fn select_mailbox_excluding<'a, S: AsRef<str>>(
    pool: &'a [Mailbox],
    now: DateTime<Utc>,
    skip: &[S],
) -> Option<&'a Mailbox> {
    pool.iter()
        .filter(|mailbox| mailbox.is_selectable(now))
        .filter(|mailbox| !skip.iter().any(|id| id.as_ref() == mailbox.id))
        .min_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.sent_count_window.cmp(&b.sent_count_window))
                .then_with(|| a.id.cmp(&b.id))
        })
}
