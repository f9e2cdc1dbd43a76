//! Mock SMTP submission server
#![allow(dead_code)]
//!
//! A configurable plaintext server that can:
//! - Advertise AUTH mechanisms and accept or refuse credentials
//! - Answer any stage with an injected failure code
//! - Hang on a given command to exercise timeouts
//! - Record every command it received for assertions
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_auth(&["PLAIN", "LOGIN"], 235)
//!     .with_rcpt_to_response(550, "User unknown")
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// Command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    /// Mechanism and, for PLAIN, the initial response
    Auth(String, Option<String>),
    /// A line sent in answer to a 334 challenge
    AuthResponse(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), dot-stuffing still applied
    MessageContent(String),
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: Reply,
    capabilities: Vec<String>,
    auth_result: u16,
    mail_from_response: Reply,
    rcpt_to_response: Reply,
    data_response: Reply,
    data_end_response: Reply,
    hang_on: Option<String>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "Mock submission server"),
            capabilities: vec!["SIZE 10000000".to_string()],
            auth_result: 235,
            mail_from_response: Reply::new(250, "OK"),
            rcpt_to_response: Reply::new(250, "OK"),
            data_response: Reply::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: Reply::new(250, "OK: Message accepted"),
            hang_on: None,
        }
    }
}

fn ehlo_reply(capabilities: &[String]) -> Vec<u8> {
    let mut response = String::from("250-mock.example.com\r\n");
    for (i, capability) in capabilities.iter().enumerate() {
        let sep = if i + 1 == capabilities.len() { ' ' } else { '-' };
        let _ = write!(response, "250{sep}{capability}\r\n");
    }
    if capabilities.is_empty() {
        response = "250 mock.example.com\r\n".to_string();
    }
    response.into_bytes()
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn reply(
        writer: &mut (impl AsyncWriteExt + Unpin),
        bytes: &[u8],
    ) -> std::io::Result<()> {
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        Self::reply(&mut writer, &config.greeting.to_bytes()).await?;

        loop {
            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let cmd_line = line.trim_end().to_string();
            let (verb, rest) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(v, r)| (v, r));
            let verb = verb.to_ascii_uppercase();

            if config.hang_on.as_deref() == Some(verb.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            match verb.as_str() {
                "EHLO" => {
                    commands.write().await.push(SmtpCommand::Ehlo(rest.to_string()));
                    Self::reply(&mut writer, &ehlo_reply(&config.capabilities)).await?;
                }
                "AUTH" => {
                    let (mechanism, initial) = rest
                        .split_once(' ')
                        .map_or((rest, None), |(m, i)| (m, Some(i.to_string())));
                    let mechanism = mechanism.to_ascii_uppercase();
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Auth(mechanism.clone(), initial));

                    if mechanism == "LOGIN" {
                        for prompt in ["VXNlcm5hbWU6", "UGFzc3dvcmQ6"] {
                            Self::reply(&mut writer, format!("334 {prompt}\r\n").as_bytes())
                                .await?;
                            line.clear();
                            if reader.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                            commands
                                .write()
                                .await
                                .push(SmtpCommand::AuthResponse(line.trim_end().to_string()));
                        }
                    }

                    let reply = if config.auth_result == 235 {
                        Reply::new(235, "2.7.0 Authentication successful")
                    } else {
                        Reply::new(config.auth_result, "5.7.8 Authentication credentials invalid")
                    };
                    Self::reply(&mut writer, &reply.to_bytes()).await?;
                }
                "MAIL" => {
                    commands.write().await.push(SmtpCommand::MailFrom(rest.to_string()));
                    Self::reply(&mut writer, &config.mail_from_response.to_bytes()).await?;
                }
                "RCPT" => {
                    commands.write().await.push(SmtpCommand::RcptTo(rest.to_string()));
                    Self::reply(&mut writer, &config.rcpt_to_response.to_bytes()).await?;
                }
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    Self::reply(&mut writer, &config.data_response.to_bytes()).await?;
                    if config.data_response.code != 354 {
                        continue;
                    }

                    let mut content = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" || line == ".\n" {
                            break;
                        }
                        content.push_str(&line);
                    }
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MessageContent(content));
                    Self::reply(&mut writer, &config.data_end_response.to_bytes()).await?;
                }
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    Self::reply(&mut writer, b"221 Bye\r\n").await?;
                    return Ok(());
                }
                "STARTTLS" => {
                    commands.write().await.push(SmtpCommand::StartTls);
                    Self::reply(&mut writer, b"502 Command not implemented\r\n").await?;
                }
                _ => {
                    commands.write().await.push(SmtpCommand::Other(cmd_line.clone()));
                    Self::reply(&mut writer, b"500 Unknown command\r\n").await?;
                }
            }
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    /// Advertise `mechanisms` and answer the final AUTH step with `result`.
    #[must_use]
    pub fn with_auth(mut self, mechanisms: &[&str], result: u16) -> Self {
        self.config
            .capabilities
            .push(format!("AUTH {}", mechanisms.join(" ")));
        self.config.auth_result = result;
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = Reply::new(code, message);
        self
    }

    /// Never answer the given verb (e.g. `"MAIL"`).
    #[must_use]
    pub fn with_hang_on(mut self, verb: &str) -> Self {
        self.config.hang_on = Some(verb.to_ascii_uppercase());
        self
    }

    /// Build and start the mock SMTP server on a random local port
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let task_commands = Arc::clone(&commands);
        let task_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            while !task_shutdown.load(Ordering::Relaxed) {
                let accept = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept {
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&task_commands);

                    tokio::spawn(async move {
                        let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            shutdown,
        })
    }
}
