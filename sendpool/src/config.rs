//! Configuration file and environment loading.

use std::path::{Path, PathBuf};

use sendpool_common::audit::AuditConfig;
use sendpool_delivery::{
    AccountingConfig, FailoverPolicy, Mailbox, SmtpTimeouts, StoreConfig,
};
use serde::Deserialize;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SENDPOOL_CONFIG";

/// Prefix of the variables describing the fallback mailbox.
pub const FALLBACK_ENV_PREFIX: &str = "SENDPOOL_FALLBACK_";

/// Everything `sendpool.config.ron` can hold. Every section is optional.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(alias = "mailbox", default)]
    pub mailboxes: Vec<Mailbox>,

    /// Used once when nothing in the pool is selectable at the start of a send.
    #[serde(default)]
    pub fallback: Option<Mailbox>,

    #[serde(default)]
    pub failover: FailoverPolicy,

    #[serde(default)]
    pub accounting: AccountingConfig,

    #[serde(default)]
    pub smtp_timeouts: SmtpTimeouts,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    /// Name announced in EHLO.
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,
}

mod defaults {
    pub fn helo_name() -> String {
        "localhost".to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailboxes: Vec::new(),
            fallback: None,
            failover: FailoverPolicy::default(),
            accounting: AccountingConfig::default(),
            smtp_timeouts: SmtpTimeouts::default(),
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            helo_name: defaults::helo_name(),
        }
    }
}

impl Config {
    /// Parses a RON document.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid RON for this shape.
    pub fn from_ron(contents: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(contents)?)
    }

    /// Reads and parses the file at `path`, then applies `SENDPOOL_FALLBACK_*`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or when the fallback
    /// variables are incomplete.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        let mut config = Self::from_ron(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
        config.apply_fallback_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Replaces the configured fallback with one described by the
    /// environment, when `SENDPOOL_FALLBACK_HOST` is set.
    ///
    /// # Errors
    ///
    /// Fails when the host is set but the sender address is missing, or the
    /// port is not a number.
    pub fn apply_fallback_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{FALLBACK_ENV_PREFIX}{name}"));

        let Some(host) = var("HOST") else {
            return Ok(());
        };
        let Some(from) = var("FROM") else {
            anyhow::bail!("{FALLBACK_ENV_PREFIX}HOST is set but {FALLBACK_ENV_PREFIX}FROM is not");
        };
        let port = match var("PORT") {
            Some(port) => port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {FALLBACK_ENV_PREFIX}PORT {port:?}: {e}"))?,
            None => 587,
        };

        let mut mailbox = Mailbox::new("fallback", host, port, from);
        mailbox.from_name = var("FROM_NAME");
        if let (Some(username), Some(password)) = (var("USERNAME"), var("PASSWORD")) {
            mailbox = mailbox.with_credentials(username, password);
        }

        mailbox.validate()?;
        self.fallback = Some(mailbox);
        Ok(())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag)
/// 2. `SENDPOOL_CONFIG` environment variable
/// 3. ./sendpool.config.ron (current working directory)
/// 4. /etc/sendpool/sendpool.config.ron (system-wide config)
///
/// # Errors
///
/// Fails when an explicitly named file does not exist, or nothing is found.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./sendpool.config.ron"),
        PathBuf::from("/etc/sendpool/sendpool.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
