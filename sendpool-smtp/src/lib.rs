//! SMTP submission client for sendpool.
//!
//! Only the client side of the protocol lives here: connecting to a
//! mailbox's submission server (plain, STARTTLS or implicit TLS),
//! authenticating and handing over a rendered message.

pub mod client;
