use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

/// What became of an alert handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Accepted but deliberately not forwarded anywhere.
    Suppressed,
}

/// Destination for escalated alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, message: &str, title: &str) -> Result<Delivery>;
}

#[derive(Deserialize)]
struct PushoverResponse {
    status: i32,
    #[serde(default)]
    errors: Vec<String>,
}

pub struct PushoverClient {
    http: Client,
    api_token: String,
    user_key: String,
}

impl PushoverClient {
    pub fn new(api_token: &str, user_key: &str) -> Self {
        Self {
            http: Client::new(),
            api_token: api_token.to_string(),
            user_key: user_key.to_string(),
        }
    }

    fn form<'a>(&'a self, message: &'a str, title: &'a str) -> [(&'static str, &'a str); 4] {
        [
            ("token", self.api_token.as_str()),
            ("user", self.user_key.as_str()),
            ("message", message),
            ("title", title),
        ]
    }
}

#[async_trait]
impl AlertSink for PushoverClient {
    async fn send_alert(&self, message: &str, title: &str) -> Result<Delivery> {
        let response = self
            .http
            .post(PUSHOVER_URL)
            .form(&self.form(message, title))
            .send()
            .await
            .context("pushover request failed")?;

        let status = response.status();
        let body: PushoverResponse = response
            .json()
            .await
            .with_context(|| format!("unreadable pushover response (HTTP {})", status))?;

        if body.status != 1 {
            anyhow::bail!("pushover rejected message: {}", body.errors.join("; "));
        }
        Ok(Delivery::Sent)
    }
}

/// Used when push credentials are missing or pushes are switched off.
pub struct DisabledAlerts;

#[async_trait]
impl AlertSink for DisabledAlerts {
    async fn send_alert(&self, message: &str, title: &str) -> Result<Delivery> {
        tracing::info!(title, message, "Push notifications disabled, alert not sent");
        Ok(Delivery::Suppressed)
    }
}
