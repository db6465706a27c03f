//! Hosting-platform domain attachment, with a readiness poll.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{ProvisionError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_VERCEL_API_BASE: &str = "https://api.vercel.com";

/// Interval between domain configuration polls.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Hosting platform API for one project.
///
/// `add` fails with [`ProvisionError::Conflict`] when the domain is already
/// attached (here or to another project). `remove` of an unattached domain
/// succeeds.
#[async_trait]
pub trait DomainHost: Send + Sync {
    async fn add(&self, host: &str) -> Result<()>;
    async fn remove(&self, host: &str) -> Result<()>;
    /// Raw configuration document; must carry a `misconfigured` flag.
    async fn config(&self, host: &str) -> Result<Value>;
    /// Read-only membership check, used by dry runs.
    async fn is_attached(&self, host: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainAction {
    Noop,
    Create,
}

impl fmt::Display for DomainAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainAction::Noop => write!(f, "noop"),
            DomainAction::Create => write!(f, "create"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainEnsure {
    pub action: DomainAction,
    /// True only if this call attached the domain.
    pub created: bool,
}

/// `misconfigured == false` means the platform is ready to serve the host.
pub fn config_ready(config: &Value) -> bool {
    config.get("misconfigured").and_then(Value::as_bool) == Some(false)
}

pub struct DomainAttachmentManager {
    host: Arc<dyn DomainHost>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl DomainAttachmentManager {
    pub fn new(host: Arc<dyn DomainHost>, retry: RetryPolicy) -> Self {
        Self {
            host,
            retry,
            poll_interval: READY_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Attach `fqdn`. An existing attachment is a no-op, not an error.
    pub async fn ensure(&self, fqdn: &str) -> Result<DomainEnsure> {
        match self.retry.run("domain.add", || self.host.add(fqdn)).await {
            Ok(()) => {
                tracing::info!(host = fqdn, "Attached domain");
                Ok(DomainEnsure {
                    action: DomainAction::Create,
                    created: true,
                })
            }
            Err(ProvisionError::Conflict(reason)) => {
                tracing::debug!(host = fqdn, %reason, "Domain already attached");
                Ok(DomainEnsure {
                    action: DomainAction::Noop,
                    created: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// What [`ensure`](Self::ensure) would do, without mutating.
    pub async fn plan(&self, fqdn: &str) -> Result<DomainEnsure> {
        let attached = self
            .retry
            .run("domain.lookup", || self.host.is_attached(fqdn))
            .await?;
        Ok(DomainEnsure {
            action: if attached {
                DomainAction::Noop
            } else {
                DomainAction::Create
            },
            created: false,
        })
    }

    pub async fn remove(&self, fqdn: &str) -> Result<()> {
        self.retry
            .run("domain.remove", || self.host.remove(fqdn))
            .await?;
        tracing::info!(host = fqdn, "Detached domain");
        Ok(())
    }

    /// Poll the domain configuration until it is ready or `timeout` elapses.
    ///
    /// At least one check is made. On timeout the error carries the last
    /// configuration seen.
    pub async fn wait_until_ready(&self, fqdn: &str, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let config = self
                .retry
                .run("domain.config", || self.host.config(fqdn))
                .await?;
            if config_ready(&config) {
                tracing::info!(host = fqdn, "Domain configuration ready");
                return Ok(config);
            }
            tracing::debug!(host = fqdn, config = %config, "Domain not ready yet");

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::PromotionTimeout {
                    host: fqdn.to_string(),
                    last: config,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Vercel project domains API.
pub struct VercelHost {
    http: reqwest::Client,
    api_base: String,
    token: String,
    project_id: String,
    team_slug: Option<String>,
}

impl VercelHost {
    pub fn new(token: &str, project_id: &str, team_slug: Option<&str>) -> Result<Self> {
        if token.trim().is_empty() || project_id.trim().is_empty() {
            return Err(ProvisionError::Fatal(
                "missing Vercel credentials: VERCEL_TOKEN / VERCEL_PROJECT_ID".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_VERCEL_API_BASE.to_string(),
            token: token.trim().to_string(),
            project_id: project_id.trim().to_string(),
            team_slug: team_slug.map(str::trim).filter(|s| !s.is_empty()).map(String::from),
        })
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> Result<url::Url> {
        let mut u = url::Url::parse(&format!("{}{path}", self.api_base))
            .map_err(|e| ProvisionError::Fatal(format!("bad Vercel API URL: {e}")))?;
        if let Some(team) = &self.team_slug {
            u.query_pairs_mut().append_pair("teamSlug", team);
        }
        Ok(u)
    }

    fn project_domains(&self) -> String {
        format!("/v10/projects/{}/domains", self.project_id)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(reqwest::StatusCode, String)> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        Ok((status, body))
    }
}

fn says_already_attached(body: &str) -> bool {
    let b = body.to_ascii_lowercase();
    ["already exists", "already in use", "owned", "exists"]
        .iter()
        .any(|needle| b.contains(needle))
}

#[async_trait]
impl DomainHost for VercelHost {
    async fn add(&self, host: &str) -> Result<()> {
        let req = self
            .http
            .post(self.url(&self.project_domains())?)
            .json(&serde_json::json!({ "name": host }));
        let (status, body) = self.send(req).await?;
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::CONFLICT
            || (status.is_client_error() && says_already_attached(&body))
        {
            return Err(ProvisionError::Conflict(format!(
                "vercel add {host}: {}",
                crate::error::truncate(&body, 300)
            )));
        }
        Err(ProvisionError::from_status("vercel add", status, &body))
    }

    async fn remove(&self, host: &str) -> Result<()> {
        let path = format!("{}/{host}", self.project_domains());
        let (status, body) = self.send(self.http.delete(self.url(&path)?)).await?;
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(ProvisionError::from_status("vercel remove", status, &body))
    }

    async fn config(&self, host: &str) -> Result<Value> {
        let path = format!("/v6/domains/{host}/config");
        let (status, body) = self.send(self.http.get(self.url(&path)?)).await?;
        if !status.is_success() {
            return Err(ProvisionError::from_status("vercel config", status, &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            ProvisionError::Fatal(format!("vercel config {host}: unexpected body: {e}"))
        })
    }

    async fn is_attached(&self, host: &str) -> Result<bool> {
        let path = format!("/v9/projects/{}/domains/{host}", self.project_id);
        let (status, body) = self.send(self.http.get(self.url(&path)?)).await?;
        match status.as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(ProvisionError::from_status("vercel lookup", status, &body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_explicit_false() {
        assert!(config_ready(&serde_json::json!({ "misconfigured": false })));
        assert!(!config_ready(&serde_json::json!({ "misconfigured": true })));
        assert!(!config_ready(&serde_json::json!({})));
        assert!(!config_ready(&Value::Null));
    }

    #[test]
    fn team_slug_is_appended() {
        let host = VercelHost::new("t", "prj_1", Some("acme-team"))
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        let u = host.url("/v10/projects/prj_1/domains").unwrap();
        assert_eq!(u.as_str(), "http://127.0.0.1:9/v10/projects/prj_1/domains?teamSlug=acme-team");
    }

    #[test]
    fn missing_credentials_are_fatal() {
        assert!(matches!(
            VercelHost::new("", "prj", None),
            Err(ProvisionError::Fatal(_))
        ));
    }
}
