//! MIME rendering for outbound system emails.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};

use super::error::{ClientError, Result};

/// Encoded body lines are wrapped at this width (RFC 2045).
const LINE_WIDTH: usize = 76;

/// Builder for a single-recipient message with a text and/or HTML body.
///
/// With only one body the message is a single `text/plain` or `text/html`
/// part; with both it becomes `multipart/alternative` (text first, as
/// clients pick the last part they can render).
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    from: Option<(String, Option<String>)>,
    to: Option<String>,
    subject: String,
    text_body: Option<String>,
    html_body: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
    headers: Vec<(String, String)>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender address and optional display name.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>, name: Option<&str>) -> Self {
        self.from = Some((address.into(), name.map(ToString::to_string)));
        self
    }

    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    #[must_use]
    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Overrides the `Date` header. Defaults to now.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the `Message-ID`. Defaults to `<ulid@sender-domain>`.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Adds an extra header; the value is written as given.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Renders the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns `BuilderError` when the sender, recipient or both bodies are missing.
    pub fn build(self) -> Result<String> {
        let Some((from_address, from_name)) = self.from else {
            return Err(ClientError::BuilderError("missing sender".to_string()));
        };
        let Some(to) = self.to else {
            return Err(ClientError::BuilderError("missing recipient".to_string()));
        };
        let date = self.date.unwrap_or_else(Utc::now);
        let message_id = self.message_id.unwrap_or_else(|| {
            let domain = from_address
                .rsplit_once('@')
                .map_or("localhost", |(_, domain)| domain);
            format!("<{}@{domain}>", ulid::Ulid::new())
        });

        let mut message = String::with_capacity(1024);
        let from = match from_name.as_deref() {
            Some(name) if !name.is_empty() => {
                format!("{} <{from_address}>", encode_display_name(name))
            }
            _ => from_address.clone(),
        };

        push_header(&mut message, "From", &from);
        push_header(&mut message, "To", &to);
        push_header(&mut message, "Subject", &encode_header(&self.subject));
        push_header(&mut message, "Date", &date.to_rfc2822());
        push_header(&mut message, "Message-ID", &message_id);
        for (name, value) in &self.headers {
            push_header(&mut message, name, value);
        }
        push_header(&mut message, "MIME-Version", "1.0");

        match (self.text_body, self.html_body) {
            (Some(text), Some(html)) => {
                let boundary = format!("=_sendpool_{}", ulid::Ulid::new());
                push_header(
                    &mut message,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{boundary}\""),
                );
                message.push_str("\r\n");

                for (content_type, body) in [("text/plain", text), ("text/html", html)] {
                    let _ = write!(message, "--{boundary}\r\n");
                    push_part(&mut message, content_type, &body);
                }
                let _ = write!(message, "--{boundary}--\r\n");
            }
            (Some(text), None) => push_part(&mut message, "text/plain", &text),
            (None, Some(html)) => push_part(&mut message, "text/html", &html),
            (None, None) => {
                return Err(ClientError::BuilderError(
                    "message needs a text or HTML body".to_string(),
                ));
            }
        }

        Ok(message)
    }
}

fn push_header(message: &mut String, name: &str, value: &str) {
    let _ = write!(message, "{name}: {value}\r\n");
}

fn push_part(message: &mut String, content_type: &str, body: &str) {
    push_header(
        message,
        "Content-Type",
        &format!("{content_type}; charset=utf-8"),
    );
    push_header(message, "Content-Transfer-Encoding", "base64");
    message.push_str("\r\n");
    message.push_str(&wrap_base64(body.as_bytes()));
}

fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH * 2 + 2);
    // base64 output is ASCII, so byte chunks are valid str boundaries
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
    out
}

/// RFC 2047 `B` encoding for non-ASCII header text.
fn encode_header(value: &str) -> String {
    if value.is_ascii() && !value.contains(['\r', '\n']) {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}

fn encode_display_name(name: &str) -> String {
    if name.is_ascii() && !name.contains(['\r', '\n']) {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        encode_header(name)
    }
}
