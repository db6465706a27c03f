//! DNS record management: idempotent CNAME upsert and delete.
//!
//! [`DnsRecordManager`] holds the algorithm; [`DnsProvider`] is the thin API
//! seam, implemented for Cloudflare by [`CloudflareDns`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// A record as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

impl DnsRecord {
    fn is_type(&self, t: &str) -> bool {
        self.record_type.eq_ignore_ascii_case(t)
    }

    /// A/AAAA/CNAME records block a new CNAME at the same name.
    fn blocks_cname(&self) -> bool {
        self.is_type("A") || self.is_type("AAAA") || self.is_type("CNAME")
    }

    fn points_at(&self, target: &str) -> bool {
        strip_dot(&self.content).eq_ignore_ascii_case(strip_dot(target)) && !self.proxied
    }
}

fn strip_dot(s: &str) -> &str {
    s.trim().trim_end_matches('.')
}

/// Body for create/update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSpec {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    /// 1 means "automatic".
    pub ttl: u32,
    pub proxied: bool,
}

impl RecordSpec {
    /// DNS-only CNAME with automatic TTL.
    pub fn cname(name: &str, target: &str) -> Self {
        Self {
            record_type: "CNAME".into(),
            name: name.to_string(),
            content: target.to_string(),
            ttl: 1,
            proxied: false,
        }
    }
}

/// DNS provider API.
///
/// `create` must fail with [`ProvisionError::Conflict`] when another record
/// at the same name prevents it. `delete` of a missing record succeeds.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn list(&self, name: &str) -> Result<Vec<DnsRecord>>;
    async fn create(&self, spec: &RecordSpec) -> Result<DnsRecord>;
    async fn update(&self, id: &str, spec: &RecordSpec) -> Result<DnsRecord>;
    async fn delete(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsAction {
    Noop,
    Created,
    Updated,
    /// Created after clearing conflicting records at the name.
    Recreated,
}

impl fmt::Display for DnsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsAction::Noop => write!(f, "noop"),
            DnsAction::Created => write!(f, "created"),
            DnsAction::Updated => write!(f, "updated"),
            DnsAction::Recreated => write!(f, "recreated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsUpsert {
    pub action: DnsAction,
    /// Empty for a dry-run plan that would create.
    pub record_id: String,
    /// True only if this call brought the record into existence.
    pub created: bool,
}

/// Idempotent CNAME operations over a [`DnsProvider`].
pub struct DnsRecordManager {
    provider: Arc<dyn DnsProvider>,
    retry: RetryPolicy,
}

impl DnsRecordManager {
    pub fn new(provider: Arc<dyn DnsProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    async fn list(&self, name: &str) -> Result<Vec<DnsRecord>> {
        self.retry
            .run("dns.list", || self.provider.list(name))
            .await
    }

    /// Make `host` a DNS-only CNAME to `target`.
    ///
    /// Calling it twice with the same arguments yields `Noop` the second time.
    pub async fn upsert_cname(&self, host: &str, target: &str) -> Result<DnsUpsert> {
        let records = self.list(host).await?;
        let spec = RecordSpec::cname(host, target);

        if let Some(existing) = records.iter().find(|r| r.is_type("CNAME")) {
            if existing.points_at(target) {
                tracing::debug!(host, record_id = %existing.id, "CNAME already in place");
                return Ok(DnsUpsert {
                    action: DnsAction::Noop,
                    record_id: existing.id.clone(),
                    created: false,
                });
            }
            let updated = self
                .retry
                .run("dns.update", || self.provider.update(&existing.id, &spec))
                .await?;
            tracing::info!(host, target, record_id = %updated.id, "Updated CNAME");
            return Ok(DnsUpsert {
                action: DnsAction::Updated,
                record_id: non_empty_or(updated.id, &existing.id),
                created: false,
            });
        }

        match self
            .retry
            .run("dns.create", || self.provider.create(&spec))
            .await
        {
            Ok(rec) => {
                tracing::info!(host, target, record_id = %rec.id, "Created CNAME");
                Ok(DnsUpsert {
                    action: DnsAction::Created,
                    record_id: rec.id,
                    created: true,
                })
            }
            Err(ProvisionError::Conflict(reason)) => {
                tracing::warn!(host, %reason, "CNAME blocked by existing records, clearing name");
                self.delete_by_name(host).await?;
                let rec = self
                    .retry
                    .run("dns.create", || self.provider.create(&spec))
                    .await?;
                tracing::info!(host, target, record_id = %rec.id, "Recreated CNAME");
                Ok(DnsUpsert {
                    action: DnsAction::Recreated,
                    record_id: rec.id,
                    created: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// What [`upsert_cname`](Self::upsert_cname) would do, without mutating.
    pub async fn plan_cname(&self, host: &str, target: &str) -> Result<DnsUpsert> {
        let records = self.list(host).await?;
        let plan = match records.iter().find(|r| r.is_type("CNAME")) {
            Some(r) if r.points_at(target) => DnsUpsert {
                action: DnsAction::Noop,
                record_id: r.id.clone(),
                created: false,
            },
            Some(r) => DnsUpsert {
                action: DnsAction::Updated,
                record_id: r.id.clone(),
                created: false,
            },
            None if records.iter().any(DnsRecord::blocks_cname) => DnsUpsert {
                action: DnsAction::Recreated,
                record_id: String::new(),
                created: false,
            },
            None => DnsUpsert {
                action: DnsAction::Created,
                record_id: String::new(),
                created: false,
            },
        };
        Ok(plan)
    }

    /// Remove every A/AAAA/CNAME record at `host`. Returns how many went.
    pub async fn delete_by_name(&self, host: &str) -> Result<usize> {
        let records = self.list(host).await?;
        let mut removed = 0;
        for rec in records.iter().filter(|r| r.blocks_cname()) {
            self.delete_record(&rec.id).await?;
            tracing::info!(
                host,
                record_id = %rec.id,
                record_type = %rec.record_type,
                "Deleted DNS record"
            );
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn delete_record(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        self.retry
            .run("dns.delete", || self.provider.delete(id))
            .await
    }
}

fn non_empty_or(id: String, fallback: &str) -> String {
    if id.is_empty() { fallback.to_string() } else { id }
}

// Cloudflare error codes meaning "another record is in the way".
const CF_CONFLICT_CODES: &[i64] = &[81053, 81054, 81055, 81057, 81058];

#[derive(Debug, Deserialize)]
struct CfEnvelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CfMessage>,
}

#[derive(Debug, Deserialize)]
struct CfMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Cloudflare v4 DNS API for one zone.
pub struct CloudflareDns {
    http: reqwest::Client,
    api_base: String,
    token: String,
    zone_id: String,
}

impl CloudflareDns {
    pub fn new(token: &str, zone_id: &str) -> Result<Self> {
        if token.trim().is_empty() || zone_id.trim().is_empty() {
            return Err(ProvisionError::Fatal(
                "missing Cloudflare credentials: CLOUDFLARE_API_TOKEN / CLOUDFLARE_ZONE_ID".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_CLOUDFLARE_API_BASE.to_string(),
            token: token.trim().to_string(),
            zone_id: zone_id.trim().to_string(),
        })
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, self.zone_id)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        match serde_json::from_str::<CfEnvelope<T>>(&body) {
            Ok(CfEnvelope {
                success: true,
                result: Some(result),
                ..
            }) if status.is_success() => Ok(result),
            Ok(env) => Err(classify_cf(what, status, &env.errors, &body)),
            Err(_) if status.is_success() => Err(ProvisionError::Fatal(format!(
                "{what}: unexpected Cloudflare response: {}",
                crate::error::truncate(&body, 300)
            ))),
            Err(_) => Err(ProvisionError::from_status(what, status, &body)),
        }
    }
}

fn classify_cf(
    what: &str,
    status: reqwest::StatusCode,
    errors: &[CfMessage],
    body: &str,
) -> ProvisionError {
    let conflict = errors.iter().any(|e| {
        CF_CONFLICT_CODES.contains(&e.code)
            || e.message.to_ascii_lowercase().contains("already exists")
    });
    if conflict {
        let msgs: Vec<String> = errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        return ProvisionError::Conflict(format!("{what}: {}", msgs.join("; ")));
    }
    if status.is_success() {
        // HTTP 200 with success=false
        return ProvisionError::Fatal(format!(
            "{what}: Cloudflare API failed: {}",
            crate::error::truncate(body, 300)
        ));
    }
    ProvisionError::from_status(what, status, body)
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn list(&self, name: &str) -> Result<Vec<DnsRecord>> {
        let req = self
            .http
            .get(self.records_url())
            .query(&[("name", name), ("per_page", "100")]);
        self.call("cloudflare list", req).await
    }

    async fn create(&self, spec: &RecordSpec) -> Result<DnsRecord> {
        let req = self.http.post(self.records_url()).json(spec);
        self.call("cloudflare create", req).await
    }

    async fn update(&self, id: &str, spec: &RecordSpec) -> Result<DnsRecord> {
        let req = self
            .http
            .put(format!("{}/{id}", self.records_url()))
            .json(spec);
        self.call("cloudflare update", req).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let req = self.http.delete(format!("{}/{id}", self.records_url()));
        match self.call::<serde_json::Value>("cloudflare delete", req).await {
            Ok(_) => Ok(()),
            Err(ProvisionError::NotFound(_)) => {
                tracing::debug!(record_id = id, "DNS record already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
