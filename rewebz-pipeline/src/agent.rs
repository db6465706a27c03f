//! Design and build agents: an opaque text-generation call plus the
//! post-processing the pipeline needs around it.
//!
//! The pipeline treats generation as a black box. [`TextGenerator`] is the
//! seam; [`LlmClient`] talks to the Claude messages API.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Smallest page the quality gate accepts, in bytes.
pub const MIN_PAGE_BYTES: usize = 1200;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single-turn completion.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Response from the messages API.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl ApiResponse {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Claude API client.
pub struct LlmClient {
    api_key: String,
    model: String,
    api_base: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(ProvisionError::Fatal("missing ANTHROPIC_API_KEY".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        Ok(Self {
            api_key: api_key.trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_tokens: 16000,
            http,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    async fn chat(&self, system: &str, messages: &[Message]) -> Result<ApiResponse> {
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": messages,
        });

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProvisionError::from_status("Claude API", status, &body));
        }
        Ok(resp.json::<ApiResponse>().await?)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let messages = [Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        let resp = self.chat(system, &messages).await?;
        if resp.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %self.model, "Completion hit max_tokens, output may be cut");
        }
        Ok(resp.text())
    }
}

pub const DESIGN_SYSTEM: &str = "You are a design-planning agent for small-business websites. \
Do not write code. Reply with a Markdown design brief only, titled DESIGN_SPEC.";

/// Prompt for the design agent, from the lead's fields.
pub fn design_prompt(brief: &str) -> String {
    [
        "Write DESIGN_SPEC.md for a single long-scrolling landing page.",
        "Cover, in order:",
        "1) brand position and tone",
        "2) core users and scenarios",
        "3) section order (hero, strengths, trust signals, call to action)",
        "4) visual system: color, type, layout, motion",
        "5) copy: three headline options, five CTA options",
        "6) how it differs from a generic template",
        "7) developer handoff checklist",
        "",
        "Business input:",
        brief,
    ]
    .join("\n")
}

/// Ensure the brief reads as a Markdown document.
pub fn normalize_design_spec(raw: &str) -> String {
    let spec = raw.trim();
    if spec.starts_with('#') {
        format!("{spec}\n")
    } else {
        format!("# DESIGN_SPEC\n\n{spec}\n")
    }
}

pub const BUILD_SYSTEM: &str = "You are a frontend developer. Build complete single-file \
HTML pages with inline CSS and no external JavaScript libraries. Output only HTML starting \
with <!doctype html>.";

pub fn build_prompt(input: &str) -> String {
    [
        "Read the DESIGN_SPEC and build a complete single-file HTML page.",
        "Production-quality visual polish, responsive layout.",
        "",
        "Project input:",
        input,
    ]
    .join("\n")
}

static FENCED_HTML_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```html\s*(.*?)```").expect("static fence pattern"));
static FENCED_ANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)```").expect("static fence pattern"));

/// Pull an HTML document out of agent output.
///
/// Prefers a fenced ```html block, then any fenced block, then the whole
/// text. Returns `None` unless the result starts with `<!doctype html>` or
/// `<html`.
pub fn extract_html(text: &str) -> Option<String> {
    let t = text.trim();
    let html = FENCED_HTML_RE
        .captures(t)
        .or_else(|| FENCED_ANY_RE.captures(t))
        .and_then(|c| c.get(1))
        .map_or(t, |m| m.as_str())
        .trim();
    let head = html.get(..15).unwrap_or(html).to_ascii_lowercase();
    if head.starts_with("<!doctype html>") || head.starts_with("<html") {
        Some(html.to_string())
    } else {
        None
    }
}

/// Why a page was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QualityIssue {
    #[error("missing <title>")]
    MissingTitle,
    #[error("page too short ({0} bytes)")]
    TooShort(usize),
}

/// Minimal sanity gate before a page is published.
pub fn quality_gate(html: &str) -> std::result::Result<(), QualityIssue> {
    if !html.to_ascii_lowercase().contains("<title>") {
        return Err(QualityIssue::MissingTitle);
    }
    if html.len() < MIN_PAGE_BYTES {
        return Err(QualityIssue::TooShort(html.len()));
    }
    Ok(())
}
