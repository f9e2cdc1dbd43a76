//! Plain-text rendering for CLI output.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use sendpool_delivery::{Mailbox, SendReport};

/// One row per mailbox, in selection order, with why it is (not) selectable.
#[must_use]
pub fn render_status(pool: &[Mailbox], now: DateTime<Utc>) -> String {
    let mut ordered: Vec<&Mailbox> = pool.iter().collect();
    ordered.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.sent_count_window.cmp(&b.sent_count_window))
            .then(a.id.cmp(&b.id))
    });

    let mut out = format!(
        "{:<20} {:>8} {:>13} {:>10}  {:<40} {}\n",
        "MAILBOX", "PRIORITY", "WINDOW", "TOTAL", "STATUS", "LAST ERROR"
    );

    for mailbox in ordered {
        let window = format!(
            "{}/{}",
            mailbox.sent_count_window, mailbox.max_sends_per_window
        );
        let last_error = mailbox
            .last_error
            .as_ref()
            .map_or_else(|| "-".to_string(), |e| format!("{} ({})", e.message, e.at.to_rfc3339()));

        let _ = writeln!(
            out,
            "{:<20} {:>8} {:>13} {:>10}  {:<40} {}",
            mailbox.id,
            mailbox.priority,
            window,
            mailbox.total_sent,
            mailbox.eligibility(now).to_string(),
            last_error
        );
    }

    if pool.is_empty() {
        out.push_str("(no mailboxes configured)\n");
    }

    out
}

/// The report summary followed by one line per attempt.
#[must_use]
pub fn render_report(report: &SendReport) -> String {
    let mut out = format!("send {}: {}\n", report.send_id, report.summary());

    for attempt in &report.attempts {
        let outcome = if attempt.success {
            "ok".to_string()
        } else {
            attempt.error.clone().unwrap_or_else(|| "failed".to_string())
        };
        let _ = writeln!(
            out,
            "  #{} {:<20} {:>6}ms  {}",
            attempt.attempt, attempt.mailbox_id, attempt.elapsed_ms, outcome
        );
    }

    out
}
