//! Operator notifications on stage transitions.
//!
//! Delivery is fire-and-forget: a failed send is logged at debug and never
//! reaches the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProvisionError, Result};

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Upper bound on how long a notification may hold up the pipeline.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`. Errors are for logging only.
    async fn send(&self, text: &str) -> Result<()>;
}

/// Send and swallow any failure.
pub async fn notify(notifier: &dyn Notifier, text: &str) {
    match tokio::time::timeout(SEND_TIMEOUT, notifier.send(text)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Notification failed"),
        Err(_) => tracing::debug!("Notification timed out"),
    }
}

/// Drops every message. Used with `--no-telegram` or when unconfigured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Telegram bot `sendMessage`.
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            token: token.trim().to_string(),
            chat_id: chat_id.trim().to_string(),
        })
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/bot{}/sendMessage", self.api_base, self.token))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProvisionError::from_status("telegram", status, &body));
        }
        Ok(())
    }
}

/// Telegram when both credentials are present and not disabled, else null.
pub fn from_settings(
    token: Option<&str>,
    chat_id: Option<&str>,
    disabled: bool,
) -> Arc<dyn Notifier> {
    let creds = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .zip(chat_id.map(str::trim).filter(|c| !c.is_empty()));
    match creds {
        Some((token, chat)) if !disabled => match TelegramNotifier::new(token, chat) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                tracing::warn!(error = %e, "Telegram notifier unavailable");
                Arc::new(NullNotifier)
            }
        },
        _ => Arc::new(NullNotifier),
    }
}

/// Message bodies. One line per fact, first line is the headline.
pub mod messages {
    pub fn promoted(slug: &str, id: Option<&str>, prod_url: &str, checks: &str) -> String {
        let mut lines = vec![
            "✅ rewebz PROMOTED".to_string(),
            format!("- slug: {slug}"),
        ];
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            lines.push(format!("- ID: {id}"));
        }
        lines.push(format!("- prod: {prod_url}"));
        lines.push(format!("- checks: {checks}"));
        lines.join("\n")
    }

    pub fn live(business: &str, slug: &str, url: &str, checks: &str, id: &str) -> String {
        let business = if business.trim().is_empty() { "(unnamed)" } else { business };
        [
            "✅ rewebz LIVE".to_string(),
            format!("- business: {business}"),
            format!("- slug: {slug}"),
            format!("- URL: {url}"),
            format!("- checks: {checks}"),
            format!("- ID: {id}"),
        ]
        .join("\n")
    }

    pub fn promote_failed(slug: &str, step: &str, error: &str) -> String {
        format!("❌ rewebz PROMOTE_ERROR\n- slug: {slug}\n- step: {step}\n- error: {error}")
    }
}
