//! In-process fakes for the network seams, plus store seeding.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use rewebz_pipeline::agent::TextGenerator;
use rewebz_pipeline::dns::{DnsProvider, DnsRecord, DnsRecordManager, RecordSpec};
use rewebz_pipeline::domain::{DomainAttachmentManager, DomainHost};
use rewebz_pipeline::error::{ProvisionError, Result};
use rewebz_pipeline::marker::inject_marker;
use rewebz_pipeline::notify::Notifier;
use rewebz_pipeline::probe::{SiteEnvelope, SiteHtmlResponse, SiteProbe};
use rewebz_pipeline::record::{
    NewTenant, RecordKey, RecordUpdate, StageFilter, TenantRecord, TenantRepository,
};
use rewebz_pipeline::retry::RetryPolicy;
use rewebz_pipeline::stage::Stage;
use rewebz_pipeline::store::SqliteStore;

pub const ROOT: &str = "example.com";
pub const TARGET: &str = "cname.vercel-dns.com";

/// Zero-delay policy so tests never sleep.
pub fn instant_retry() -> RetryPolicy {
    RetryPolicy::fixed(2, Duration::ZERO)
}

/// A page that passes the quality gate, before the build marker goes in.
pub fn unmarked_page(slug: &str) -> String {
    let body = "<p>Fresh bread every morning.</p>".repeat(60);
    format!("<!doctype html><html><head><title>{slug}</title></head><body>{body}</body></html>")
}

pub fn page(slug: &str) -> String {
    inject_marker(&unmarked_page(slug), slug)
}

// ---- DNS ----

#[derive(Default)]
pub struct FakeDns {
    records: Mutex<Vec<DnsRecord>>,
    next_id: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Every call fails with a transient error while set.
    pub down: AtomicBool,
    /// Creates for names containing any of these fail permanently.
    rejected: Mutex<Vec<String>>,
}

impl FakeDns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, record_type: &str, name: &str, content: &str) -> String {
        let id = format!("seed_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().push(DnsRecord {
            id: id.clone(),
            record_type: record_type.into(),
            name: name.into(),
            content: content.into(),
            ttl: 1,
            proxied: false,
        });
        id
    }

    pub fn reject_containing(&self, fragment: &str) {
        self.rejected.lock().push(fragment.to_string());
    }

    pub fn allow_all(&self) {
        self.rejected.lock().clear();
    }

    pub fn named(&self, name: &str) -> Vec<DnsRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn mutations(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn manager(self: &Arc<Self>) -> DnsRecordManager {
        DnsRecordManager::new(self.clone(), instant_retry())
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProvisionError::Transient("dns api unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn list(&self, name: &str) -> Result<Vec<DnsRecord>> {
        self.check_up()?;
        Ok(self.named(name))
    }

    async fn create(&self, spec: &RecordSpec) -> Result<DnsRecord> {
        self.check_up()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().iter().any(|f| spec.name.contains(f.as_str())) {
            return Err(ProvisionError::Fatal(format!("zone refuses {}", spec.name)));
        }
        let mut records = self.records.lock();
        let blocked = records.iter().any(|r| {
            r.name == spec.name && ["A", "AAAA", "CNAME"].contains(&r.record_type.as_str())
        });
        if blocked {
            return Err(ProvisionError::Conflict(format!("record already exists at {}", spec.name)));
        }
        let rec = DnsRecord {
            id: format!("rec_{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            record_type: spec.record_type.clone(),
            name: spec.name.clone(),
            content: spec.content.clone(),
            ttl: spec.ttl,
            proxied: spec.proxied,
        };
        records.push(rec.clone());
        Ok(rec)
    }

    async fn update(&self, id: &str, spec: &RecordSpec) -> Result<DnsRecord> {
        self.check_up()?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock();
        let rec = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ProvisionError::NotFound(format!("dns record {id}")))?;
        rec.content = spec.content.clone();
        rec.proxied = spec.proxied;
        Ok(rec.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check_up()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.records.lock().retain(|r| r.id != id);
        Ok(())
    }
}

// ---- Domain host ----

pub struct FakeDomains {
    attached: Mutex<HashSet<String>>,
    pub ready: AtomicBool,
    /// `remove` fails permanently while set.
    pub refuse_removal: AtomicBool,
    pub adds: AtomicUsize,
    pub removes: AtomicUsize,
}

impl FakeDomains {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attached: Mutex::new(HashSet::new()),
            ready: AtomicBool::new(true),
            refuse_removal: AtomicBool::new(false),
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        })
    }

    pub fn attach(&self, host: &str) {
        self.attached.lock().insert(host.to_string());
    }

    pub fn is_attached_now(&self, host: &str) -> bool {
        self.attached.lock().contains(host)
    }

    pub fn mutations(&self) -> usize {
        self.adds.load(Ordering::SeqCst) + self.removes.load(Ordering::SeqCst)
    }

    pub fn manager(self: &Arc<Self>) -> DomainAttachmentManager {
        DomainAttachmentManager::new(self.clone(), instant_retry())
            .with_poll_interval(Duration::from_millis(5))
    }
}

#[async_trait]
impl DomainHost for FakeDomains {
    async fn add(&self, host: &str) -> Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        if !self.attached.lock().insert(host.to_string()) {
            return Err(ProvisionError::Conflict(format!("{host} already in use")));
        }
        Ok(())
    }

    async fn remove(&self, host: &str) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.refuse_removal.load(Ordering::SeqCst) {
            return Err(ProvisionError::Fatal(format!("remove denied for {host}")));
        }
        self.attached.lock().remove(host);
        Ok(())
    }

    async fn config(&self, _host: &str) -> Result<Value> {
        Ok(json!({ "misconfigured": !self.ready.load(Ordering::SeqCst) }))
    }

    async fn is_attached(&self, host: &str) -> Result<bool> {
        Ok(self.is_attached_now(host))
    }
}

// ---- Probes ----

/// Answers from fixed per-host tables. Unknown hosts get 404.
#[derive(Default)]
pub struct FakeProbe {
    pages: Mutex<HashMap<String, SiteHtmlResponse>>,
    heads: Mutex<HashMap<String, u16>>,
    pub site_html_calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `host` serves tenant `slug` with a marked page.
    pub fn serve(&self, host: &str, slug: &str) {
        self.serve_html(host, slug, &page(slug));
    }

    pub fn serve_html(&self, host: &str, slug: &str, html: &str) {
        self.pages.lock().insert(
            host.to_string(),
            SiteHtmlResponse {
                status: 200,
                envelope: Some(SiteEnvelope::tenant(slug, html)),
            },
        );
    }

    pub fn head_status(&self, url: &str, code: u16) {
        self.heads.lock().insert(url.to_string(), code);
    }
}

#[async_trait]
impl SiteProbe for FakeProbe {
    async fn head(&self, url: &str) -> Result<u16> {
        Ok(self.heads.lock().get(url).copied().unwrap_or(404))
    }

    async fn site_html(&self, host: &str) -> Result<SiteHtmlResponse> {
        self.site_html_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .lock()
            .get(host)
            .cloned()
            .unwrap_or(SiteHtmlResponse {
                status: 404,
                envelope: None,
            }))
    }
}

// ---- Notifications ----

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}

// ---- Agent ----

/// Replays canned completions in order, then fails.
pub struct CannedAgent {
    replies: Mutex<Vec<Result<String>>>,
    pub calls: AtomicUsize,
}

impl CannedAgent {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        let mut replies = replies;
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for CannedAgent {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .pop()
            .unwrap_or_else(|| Err(ProvisionError::Transient("no canned reply left".into())))
    }
}

// ---- Store ----

pub fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

/// Delegates to a real store but rejects every write that would mark a
/// record `PROMOTED`.
pub struct RefusesPromotion {
    pub inner: Arc<SqliteStore>,
}

#[async_trait]
impl TenantRepository for RefusesPromotion {
    async fn scan(&self, filter: &StageFilter) -> Result<Vec<TenantRecord>> {
        self.inner.scan(filter).await
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<TenantRecord>> {
        self.inner.get(key).await
    }

    async fn update(&self, row: usize, update: RecordUpdate) -> Result<TenantRecord> {
        if update.stage == Some(Stage::Promoted) {
            return Err(ProvisionError::Store("disk I/O error".into()));
        }
        self.inner.update(row, update).await
    }

    async fn insert(&self, tenant: NewTenant) -> Result<TenantRecord> {
        self.inner.insert(tenant).await
    }
}

/// Stages walked through to reach `target` from `NEW`.
fn path_to(target: Stage) -> Vec<Stage> {
    use Stage::*;
    let built = vec![DnsDone, DesignDone, DevDone];
    match target {
        New => vec![],
        DnsDone | DnsError => vec![target],
        DesignDone | DesignError => vec![DnsDone, target],
        DevDone | DevError => vec![DnsDone, DesignDone, target],
        Live | VerifyError | Promoted | PromoteError => [built, vec![target]].concat(),
        OpenDone => panic!("OPEN_DONE is only reachable through legacy data"),
    }
}

/// Insert a lead and walk it to `stage`, setting slug and preview URL.
pub async fn seed(
    store: &SqliteStore,
    id: &str,
    business_name: &str,
    stage: Stage,
    slug: Option<&str>,
) -> TenantRecord {
    let mut rec = store
        .insert(NewTenant {
            id: id.into(),
            business_name: business_name.into(),
            category: "bakery".into(),
            region: "Berlin".into(),
            goal: "more walk-ins".into(),
        })
        .await
        .unwrap();
    if let Some(slug) = slug {
        rec = store
            .update(
                rec.row,
                RecordUpdate::default()
                    .with_slug(slug)
                    .with_preview_url(format!("https://{slug}.preview.{ROOT}")),
            )
            .await
            .unwrap();
    }
    for step in path_to(stage) {
        rec = store.update(rec.row, RecordUpdate::stage(step)).await.unwrap();
    }
    rec
}
