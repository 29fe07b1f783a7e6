/// Notification channels
///
/// A `Notifier` maps channel names (as used in step configs) to channel
/// implementations. Built-in channels log through `tracing` or POST to a
/// webhook URL.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &str, recipients: &[String], severity: Severity) -> Result<()>;
}

/// Channel name → implementation
#[derive(Clone, Default)]
pub struct Notifier {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, name: impl Into<String>, channel: Arc<dyn NotificationChannel>) -> Self {
        self.register(name, channel);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(name.into(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").field("channels", &self.names()).finish()
    }
}

/// Writes notifications to the tracing log
#[derive(Debug, Clone)]
pub struct LogChannel {
    label: String,
}

impl LogChannel {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, message: &str, recipients: &[String], severity: Severity) -> Result<()> {
        match severity {
            Severity::Critical => tracing::error!("📣 [{}] {} -> {:?}", self.label, message, recipients),
            Severity::Warning => tracing::warn!("📣 [{}] {} -> {:?}", self.label, message, recipients),
            Severity::Info => tracing::info!("📣 [{}] {} -> {:?}", self.label, message, recipients),
        }
        Ok(())
    }
}

/// POSTs `{message, recipients, severity}` as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, message: &str, recipients: &[String], severity: Severity) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "message": message,
                "recipients": recipients,
                "severity": severity,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("webhook {} returned HTTP {}", self.url, status.as_u16()));
        }
        Ok(())
    }
}
