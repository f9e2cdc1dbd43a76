//! Command-line entry point for sendpool
//!
//! - `serve`: run the accounting window reset job until ctrl-c/SIGTERM
//! - `send`: one failover send, printing the per-attempt report
//! - `status`: every mailbox with its selection status
//! - `reset`: roll accounting windows over by hand
//! - `test-failover`: send a diagnostic message through the failover path

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use sendpool::{
    config::{Config, find_config_file},
    controller::Sendpool,
    report::{render_report, render_status},
};
use sendpool_common::logging;
use sendpool_delivery::OutgoingMessage;

/// Send system email through a pool of SMTP mailboxes
#[derive(Parser, Debug)]
#[command(name = "sendpool")]
#[command(about = "Send system email through a pool of SMTP mailboxes", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the accounting window reset job until interrupted
    Serve,
    /// Send one message with failover
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        /// Plain-text body
        #[arg(long)]
        text: Option<String>,

        /// HTML body
        #[arg(long)]
        html: Option<String>,

        /// Mailboxes to try at most (defaults to the configured policy)
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Show every mailbox and whether it can be selected now
    Status,
    /// Reset elapsed accounting windows
    Reset {
        /// Reset every window, elapsed or not
        #[arg(long)]
        all: bool,
    },
    /// Send a diagnostic message and print every attempt
    TestFailover {
        /// Recipient address
        #[arg(long)]
        to: String,
    },
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn send(
    sendpool: &Sendpool,
    to: &str,
    message: &OutgoingMessage,
    max: Option<u32>,
) -> anyhow::Result<()> {
    let report = sendpool.send(to, message, max, interrupted()).await?;
    print!("{}", render_report(&report));

    if !report.success {
        anyhow::bail!("{}", report.summary());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config.as_deref())?;
    let config = Config::load(&config_path)?;

    logging::init();

    let sendpool = Sendpool::init(config).await?;

    match cli.command {
        Commands::Serve => sendpool.serve().await?,
        Commands::Send {
            to,
            subject,
            text,
            html,
            max_attempts,
        } => {
            let message = OutgoingMessage {
                subject,
                text_body: text,
                html_body: html,
            };
            send(&sendpool, &to, &message, max_attempts).await?;
        }
        Commands::Status => {
            print!("{}", render_status(&sendpool.mailboxes().await?, Utc::now()));
        }
        Commands::Reset { all } => {
            let reset = sendpool.reset(all).await?;
            println!("Reset {reset} accounting window(s)");
        }
        Commands::TestFailover { to } => {
            let now = Utc::now();
            let message = OutgoingMessage::text(
                "sendpool failover test",
                format!(
                    "This is a diagnostic message sent by sendpool at {}.\r\n\
                     It exercises mailbox selection and failover; no action is needed.",
                    now.to_rfc3339()
                ),
            );
            send(&sendpool, &to, &message, None).await?;
        }
    }

    Ok(())
}
