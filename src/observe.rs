use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::runtime::RuntimeFlavor;

use crate::config::{ObserverConfig, TelegramConfig};

pub const ACTION_LOG_FILE: &str = "log.txt";
pub const ERROR_LOG_FILE: &str = "error_log.txt";
pub const URL_LOG_FILE: &str = "url_log.txt";

/// Fire-and-forget side channels. Implementations swallow their own failures;
/// nothing here may change the outcome of a crawl or a package.
#[async_trait]
pub trait Observer: Send + Sync {
    fn action(&self, message: &str);
    fn error(&self, message: &str, location: Option<&str>);
    fn url_visited(&self, location: &str);
    async fn alert(&self, message: &str, is_error: bool);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl Observer for NoopObserver {
    fn action(&self, _message: &str) {}
    fn error(&self, _message: &str, _location: Option<&str>) {}
    fn url_visited(&self, _location: &str) {}
    async fn alert(&self, _message: &str, _is_error: bool) {}
}

/// Timestamped append-only log files plus an optional Telegram alert channel.
#[derive(Debug, Clone)]
pub struct LogObserver {
    config: ObserverConfig,
    client: reqwest::Client,
}

impl LogObserver {
    pub fn new(config: ObserverConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build alert http client")?;
        Ok(Self { config, client })
    }

    fn append(&self, file_name: &str, entry: &str) {
        let path = self.config.log_dir.join(file_name);
        let write = || append_line(&path, entry);
        let written = match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(write)
            }
            _ => write(),
        };
        if let Err(err) = written {
            tracing::debug!(path = %path.display(), ?err, "log sink unavailable");
        }
    }

    async fn send_telegram(&self, telegram: &TelegramConfig, text: &str) -> anyhow::Result<()> {
        let endpoint = format!(
            "{}/bot{}/sendMessage",
            telegram.api_base.trim_end_matches('/'),
            telegram.bot_token
        );
        let body = serde_json::json!({
            "chat_id": telegram.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .context("POST telegram sendMessage")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Failed to send Telegram notification. Status code: {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl Observer for LogObserver {
    fn action(&self, message: &str) {
        if !self.config.action_log {
            return;
        }
        self.append(ACTION_LOG_FILE, &format!("{} - {message}\n", timestamp()));
    }

    fn error(&self, message: &str, location: Option<&str>) {
        if !self.config.error_log {
            return;
        }
        self.append(ERROR_LOG_FILE, &format_error_entry(&timestamp(), message, location));
        self.action(&format!("Error logged: {message}"));
    }

    fn url_visited(&self, location: &str) {
        if !self.config.url_log {
            return;
        }
        self.append(URL_LOG_FILE, &format!("{} - {location}\n", timestamp()));
        self.action("URL logged to url_log.txt");
    }

    async fn alert(&self, message: &str, is_error: bool) {
        let Some(telegram) = self.config.telegram.as_ref() else {
            return;
        };
        let icon = if is_error { "❌" } else { "✅" };
        match self.send_telegram(telegram, &format!("{icon} {message}")).await {
            Ok(()) => self.action(&format!("Telegram notification sent: {message}")),
            Err(err) => {
                tracing::warn!(?err, "telegram alert failed");
                self.error(&format!("Error sending Telegram notification: {err:#}"), None);
            }
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_error_entry(timestamp: &str, message: &str, location: Option<&str>) -> String {
    let mut entry = format!("{timestamp} - {message}");
    if let Some(location) = location
        && !message.contains(location)
    {
        entry.push_str(&format!("\nURL: {location}"));
    }
    entry.push('\n');
    entry.push_str(&"-".repeat(50));
    entry.push('\n');
    entry
}

fn append_line(path: &Path, entry: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir: {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log: {}", path.display()))?;
    file.write_all(entry.as_bytes())
        .with_context(|| format!("write log: {}", path.display()))?;
    Ok(())
}
