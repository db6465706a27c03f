//! `DEV_DONE` → `LIVE`: confirm the preview actually serves the built page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Outcome, StageRunner};
use crate::error::Result;
use crate::notify::{self, Notifier, messages};
use crate::probe::SiteProbe;
use crate::record::{RecordUpdate, TenantRecord, TenantRepository};
use crate::resolve::TenantDomains;
use crate::retry::RetryPolicy;
use crate::source::SiteSource;
use crate::stage::Stage;
use crate::verify::{HealthVerifier, PROBE_INTERVAL, SourceChecker};

#[derive(Debug, Clone)]
pub struct VerifyLiveConfig {
    pub source_tries: u32,
    pub head_tries: u32,
    pub probe_interval: Duration,
}

impl Default for VerifyLiveConfig {
    fn default() -> Self {
        Self {
            source_tries: 3,
            head_tries: 3,
            probe_interval: PROBE_INTERVAL,
        }
    }
}

pub struct VerifyLiveRunner {
    repo: Arc<dyn TenantRepository>,
    source: Arc<dyn SiteSource>,
    checker: SourceChecker,
    health: HealthVerifier,
    domains: TenantDomains,
    notifier: Arc<dyn Notifier>,
    config: VerifyLiveConfig,
}

impl VerifyLiveRunner {
    pub fn new(
        repo: Arc<dyn TenantRepository>,
        source: Arc<dyn SiteSource>,
        probe: Arc<dyn SiteProbe>,
        domains: TenantDomains,
        notifier: Arc<dyn Notifier>,
        config: VerifyLiveConfig,
    ) -> Self {
        let checker = SourceChecker::new(
            probe.clone(),
            RetryPolicy::fixed(config.source_tries, config.probe_interval),
        );
        let health = HealthVerifier::new(probe, config.probe_interval);
        Self {
            repo,
            source,
            checker,
            health,
            domains,
            notifier,
            config,
        }
    }
}

#[async_trait]
impl StageRunner for VerifyLiveRunner {
    fn name(&self) -> &'static str {
        "live"
    }

    fn triggers(&self) -> &'static [Stage] {
        &[Stage::DevDone, Stage::OpenDone, Stage::VerifyError]
    }

    fn error_stage(&self) -> Stage {
        Stage::VerifyError
    }

    fn eligible(&self, record: &TenantRecord) -> bool {
        record.slug().is_some()
            && record
                .preview_url
                .as_deref()
                .is_some_and(|u| !u.trim().is_empty())
    }

    async fn prepare(&self) -> Result<()> {
        self.source.refresh().await
    }

    /// Gates that are merely not met yet leave the record where it is, so a
    /// later run picks it up after propagation. Only hard errors move it to
    /// `VERIFY_ERROR`.
    async fn process(&self, record: &TenantRecord) -> Result<Outcome> {
        let (Some(slug), Some(preview_url)) = (record.slug(), record.preview_url.as_deref()) else {
            return Ok(Outcome::Skipped("no slug or preview url".into()));
        };
        let label = self.source.label();

        if !self.source.exists(slug).await? {
            return Ok(Outcome::Skipped(format!("source missing in {label}")));
        }

        let host = self.domains.source_host(slug, Some(preview_url), None);
        let source = self.checker.check(&host, slug).await;
        if !source.passed() {
            return Ok(Outcome::Skipped(format!(
                "preview source not ready (sitehtml:{}, marker:{})",
                source.code,
                if source.marker_ok { "ok" } else { "missing" }
            )));
        }

        let head = self.health.probe(preview_url, self.config.head_tries).await;
        if head == 0 {
            return Ok(Outcome::Skipped("preview HEAD failed".into()));
        }

        let digest = match self.source.snapshot(slug).await {
            Ok(Some(snap)) => format!(",sha256:{}", snap.short_digest()),
            Ok(None) => String::new(),
            Err(e) => {
                tracing::debug!(slug, error = %e, "Snapshot unavailable for audit note");
                String::new()
            }
        };
        let checks = format!("{label},sitehtml:{},head:{head}", source.code);
        self.repo
            .update(
                record.row,
                RecordUpdate::stage(Stage::Live)
                    .expecting(record.stage)
                    .with_note(format!("live:verified({checks}{digest})")),
            )
            .await?;
        tracing::info!(id = %record.id, slug, %host, head, "Preview verified live");

        notify::notify(
            self.notifier.as_ref(),
            &messages::live(&record.business_name, slug, preview_url, &checks, &record.id),
        )
        .await;
        Ok(Outcome::Done)
    }
}
