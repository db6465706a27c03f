//! HTTP probes against tenant hostnames.
//!
//! Two calls: a HEAD existence probe, and a GET against the edge runtime's
//! content-introspection endpoint, which answers with the HTML it would
//! serve for the requesting host.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Path of the content-introspection endpoint on every tenant host.
pub const SITE_HTML_PATH: &str = "/api/sitehtml";

/// JSON envelope returned by the content-introspection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteEnvelope {
    #[serde(default)]
    pub ok: bool,
    /// `"root"` for the bare domain, `"tenant"` for a tenant host.
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Where the edge read the HTML from (`r2`, `local`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SiteEnvelope {
    /// Envelope for a tenant page, as the edge runtime would serve it.
    pub fn tenant(slug: &str, html: &str) -> Self {
        Self {
            ok: true,
            kind: "tenant".into(),
            slug: Some(slug.into()),
            html: Some(html.into()),
            ..Default::default()
        }
    }

    /// True if this is a successful tenant answer for `slug` with an HTML document.
    pub fn serves_tenant(&self, slug: &str) -> bool {
        self.ok
            && self.kind == "tenant"
            && self.slug.as_deref().map(str::trim) == Some(slug)
            && self
                .html
                .as_deref()
                .is_some_and(|h| h.to_ascii_lowercase().contains("<html"))
    }
}

/// One content-introspection response.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteHtmlResponse {
    pub status: u16,
    /// `None` when the body was not a JSON envelope.
    pub envelope: Option<SiteEnvelope>,
}

impl SiteHtmlResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network seam for health and content checks.
///
/// Implementations return `Err` only when no HTTP response arrived at all;
/// any status code, including 5xx, is a successful probe.
#[async_trait]
pub trait SiteProbe: Send + Sync {
    /// HEAD `url`; returns the final status code.
    async fn head(&self, url: &str) -> Result<u16>;

    /// GET the content-introspection endpoint on `host`, bypassing caches.
    async fn site_html(&self, host: &str) -> Result<SiteHtmlResponse>;
}

/// reqwest-backed [`SiteProbe`].
pub struct HttpSiteProbe {
    http: reqwest::Client,
    scheme: String,
}

impl HttpSiteProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rewebz-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            scheme: "https".into(),
        })
    }

    /// Use `http://` for introspection calls (local mock servers).
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    fn site_html_url(&self, host: &str) -> String {
        format!("{}://{host}{SITE_HTML_PATH}", self.scheme)
    }
}

#[async_trait]
impl SiteProbe for HttpSiteProbe {
    async fn head(&self, url: &str) -> Result<u16> {
        let resp = self.http.head(url).send().await?;
        Ok(resp.status().as_u16())
    }

    async fn site_html(&self, host: &str) -> Result<SiteHtmlResponse> {
        let resp = self
            .http
            .get(self.site_html_url(host))
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let envelope = serde_json::from_str::<SiteEnvelope>(&body).ok();
        if envelope.is_none() {
            tracing::debug!(host, status, "Introspection body was not an envelope");
        }
        Ok(SiteHtmlResponse { status, envelope })
    }
}
