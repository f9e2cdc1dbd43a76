//! SMTP submission client.
//!
//! This module provides the client half of a submission session:
//!
//! - Plain TCP, implicit TLS (port 465 style) and STARTTLS upgrade
//! - EHLO capability discovery
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - MIME rendering of text, HTML and `multipart/alternative` messages
//!
//! # Examples
//!
//! ```no_run
//! use sendpool_smtp::client::{Capabilities, MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com".to_string()).await?;
//! client.read_greeting().await?.ensure_success()?;
//!
//! let ehlo = client.ehlo("client.example.com").await?.ensure_success()?;
//! if Capabilities::from_ehlo(&ehlo).starttls {
//!     client.starttls().await?.ensure_success()?;
//! }
//! let capabilities = Capabilities::from_ehlo(&client.ehlo("client.example.com").await?);
//! client.authenticate(&capabilities, "alerts@example.com", "secret").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("alerts@example.com", Some("Alerts"))
//!     .to("ops@example.com")
//!     .subject("Disk usage")
//!     .text_body("Disk is 91% full")
//!     .build()?;
//!
//! client.mail_from("alerts@example.com").await?.ensure_success()?;
//! client.rcpt_to("ops@example.com").await?.ensure_success()?;
//! client.data().await?;
//! client.send_data(&message).await?.ensure_success()?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::{Capabilities, Response, ResponseLine};
pub use smtp_client::SmtpClient;
