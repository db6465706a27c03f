//! Promotion orchestrator: preview → production cutover for one tenant.

use std::sync::Arc;
use std::time::Duration;

use crate::dns::{DnsRecordManager, DnsUpsert};
use crate::domain::{DomainAttachmentManager, DomainEnsure};
use crate::error::{ProvisionError, truncate};
use crate::notify::{self, Notifier, messages};
use crate::probe::SiteProbe;
use crate::record::{RecordUpdate, TenantRecord, TenantRepository};
use crate::resolve::{TargetRef, TargetResolver, TenantDomains};
use crate::retry::RetryPolicy;
use crate::stage::{PromotionState, PromotionStep, Stage};
use crate::verify::{HealthVerifier, PROBE_INTERVAL, SourceCheck, SourceChecker};

use super::saga::{Compensation, CompensationStack, CreatedResources, RollbackOutcome};

/// Longest error text kept in a failure note.
const NOTE_ERROR_MAX: usize = 400;

#[derive(Debug, Clone)]
pub struct PromotionConfig {
    pub domains: TenantDomains,
    /// CNAME target for production hosts.
    pub cname_target: String,
    /// Bound on the domain readiness poll.
    pub timeout: Duration,
    /// Decide the DNS and domain steps without mutating anything, then stop.
    pub dry_run: bool,
    /// Introspection attempts against the preview host.
    pub source_tries: u32,
    /// HEAD and introspection attempts against the production host.
    pub prod_tries: u32,
    pub probe_interval: Duration,
    pub id_prefix: String,
}

impl PromotionConfig {
    pub fn new(domains: TenantDomains, cname_target: &str) -> Self {
        Self {
            domains,
            cname_target: cname_target.to_string(),
            timeout: Duration::from_secs(600),
            dry_run: false,
            source_tries: 3,
            prod_tries: 4,
            probe_interval: PROBE_INTERVAL,
            id_prefix: "rwz_".to_string(),
        }
    }
}

/// Result of a completed (or dry-run) promotion.
#[derive(Debug, Clone)]
pub struct PromotionReport {
    pub slug: String,
    pub prod_url: String,
    pub source_host: String,
    pub source: SourceCheck,
    pub dns: DnsUpsert,
    pub domain: DomainEnsure,
    pub head_code: Option<u16>,
    pub prod_check: Option<SourceCheck>,
    pub state: PromotionState,
    pub dry_run: bool,
    /// The record as persisted, if there was one.
    pub record: Option<TenantRecord>,
}

impl PromotionReport {
    /// Compact summary of every check, for audit notes and notifications.
    pub fn checks(&self) -> String {
        let mut out = format!("dns:{},vercel:{}", self.dns.action, self.domain.action);
        if let Some(code) = self.head_code {
            out.push_str(&format!(",head:{code}"));
        }
        if let Some(check) = self.prod_check {
            out.push_str(&format!(
                ",sitehtml:{},marker:{}",
                check.code,
                if check.marker_ok { "ok" } else { "missing" }
            ));
        }
        out
    }

    pub fn audit_note(&self) -> String {
        format!("promote:done(prod:{}, checks:{})", self.prod_url, self.checks())
    }
}

/// A failed promotion, after best-effort rollback.
#[derive(Debug, thiserror::Error)]
#[error("promotion failed at {step}: {error}")]
pub struct PromotionFailure {
    pub slug: Option<String>,
    pub step: PromotionStep,
    #[source]
    pub error: ProvisionError,
    /// What this run had created when it failed.
    pub created: CreatedResources,
    pub rollback: RollbackOutcome,
}

impl PromotionFailure {
    fn untouched(slug: Option<String>, step: PromotionStep, error: ProvisionError) -> Self {
        Self {
            slug,
            step,
            error,
            created: CreatedResources::default(),
            rollback: RollbackOutcome::default(),
        }
    }
}

type StepResult<T> = std::result::Result<T, (PromotionStep, ProvisionError)>;

/// Per-invocation state.
struct Run {
    slug: String,
    record: Option<TenantRecord>,
    state: PromotionState,
    stack: CompensationStack,
}

impl Run {
    fn advance(&mut self, to: PromotionState, step: PromotionStep) -> StepResult<()> {
        self.state.advance(to).map_err(|e| (step, e))
    }
}

pub struct Promoter {
    repo: Arc<dyn TenantRepository>,
    dns: DnsRecordManager,
    domains: DomainAttachmentManager,
    probe: Arc<dyn SiteProbe>,
    notifier: Arc<dyn Notifier>,
    config: PromotionConfig,
}

impl Promoter {
    pub fn new(
        repo: Arc<dyn TenantRepository>,
        dns: DnsRecordManager,
        domains: DomainAttachmentManager,
        probe: Arc<dyn SiteProbe>,
        notifier: Arc<dyn Notifier>,
        config: PromotionConfig,
    ) -> Self {
        Self {
            repo,
            dns,
            domains,
            probe,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    fn source_checker(&self, tries: u32) -> SourceChecker {
        SourceChecker::new(
            self.probe.clone(),
            RetryPolicy::fixed(tries, self.config.probe_interval),
        )
    }

    /// Promote the tenant `target` refers to.
    ///
    /// Never reaches `PROMOTED` unless every check passed in order. On
    /// failure, only resources this run created are removed.
    pub async fn promote(&self, target: &TargetRef) -> Result<PromotionReport, PromotionFailure> {
        let resolver = TargetResolver::new(
            self.repo.as_ref(),
            &self.config.domains,
            &self.config.id_prefix,
        );
        let resolved = resolver
            .resolve(target)
            .await
            .map_err(|e| PromotionFailure::untouched(None, PromotionStep::Resolve, e))?;

        if let Some(rec) = &resolved.record
            && !rec.stage.is_promotable()
        {
            return Err(PromotionFailure::untouched(
                Some(resolved.slug.clone()),
                PromotionStep::Resolve,
                ProvisionError::Validation(format!(
                    "record {} is at stage {}, content has not been built",
                    rec.id, rec.stage
                )),
            ));
        }
        if resolved.record.is_none() {
            tracing::warn!(
                slug = %resolved.slug,
                "No tenant record for slug, result will not be persisted"
            );
        }

        let mut run = Run {
            slug: resolved.slug,
            record: resolved.record,
            state: PromotionState::Unstarted,
            stack: CompensationStack::new(),
        };
        tracing::info!(slug = %run.slug, dry_run = self.config.dry_run, "Promotion started");

        match self
            .drive(&mut run, resolved.source_hint_host.as_deref())
            .await
        {
            Ok(report) => Ok(report),
            Err((step, error)) => Err(self.fail(run, step, error).await),
        }
    }

    async fn drive(&self, run: &mut Run, hint: Option<&str>) -> StepResult<PromotionReport> {
        let cfg = &self.config;
        let slug = run.slug.clone();
        let prod_host = cfg.domains.prod_host(&slug);
        let prod_url = format!("https://{prod_host}");

        let preview_url = run.record.as_ref().and_then(|r| r.preview_url.clone());
        let source_host = cfg.domains.source_host(&slug, preview_url.as_deref(), hint);
        let source = self.source_checker(cfg.source_tries).check(&source_host, &slug).await;
        if !source.passed() {
            return Err((
                PromotionStep::SourceVerify,
                ProvisionError::Verification(format!(
                    "source check failed on {source_host}: sitehtml={}, marker={}",
                    source.code, source.marker_ok
                )),
            ));
        }
        run.advance(PromotionState::SourceVerified, PromotionStep::SourceVerify)?;
        tracing::info!(
            slug = %slug,
            host = %source_host,
            code = source.code,
            "Preview source verified"
        );

        let dns = if cfg.dry_run {
            self.dns.plan_cname(&prod_host, &cfg.cname_target).await
        } else {
            self.dns.upsert_cname(&prod_host, &cfg.cname_target).await
        }
        .map_err(|e| (PromotionStep::Dns, e))?;
        if dns.created {
            run.stack.push(Compensation::DeleteDnsRecord {
                host: prod_host.clone(),
                record_id: dns.record_id.clone(),
            });
        }
        run.advance(PromotionState::DnsReady, PromotionStep::Dns)?;
        tracing::info!(
            slug = %slug,
            host = %prod_host,
            action = %dns.action,
            target = %cfg.cname_target,
            dry_run = cfg.dry_run,
            "Production DNS"
        );

        let domain = if cfg.dry_run {
            self.domains.plan(&prod_host).await
        } else {
            self.domains.ensure(&prod_host).await
        }
        .map_err(|e| (PromotionStep::DomainAttach, e))?;
        if domain.created {
            run.stack.push(Compensation::DetachDomain {
                host: prod_host.clone(),
            });
        }
        run.advance(PromotionState::DomainAttached, PromotionStep::DomainAttach)?;
        tracing::info!(
            slug = %slug,
            host = %prod_host,
            action = %domain.action,
            dry_run = cfg.dry_run,
            "Production domain"
        );

        let mut report = PromotionReport {
            slug: slug.clone(),
            prod_url: prod_url.clone(),
            source_host,
            source,
            dns,
            domain,
            head_code: None,
            prod_check: None,
            state: run.state.clone(),
            dry_run: cfg.dry_run,
            record: run.record.clone(),
        };
        if cfg.dry_run {
            tracing::info!(slug = %slug, "Dry run complete");
            return Ok(report);
        }

        self.domains
            .wait_until_ready(&prod_host, cfg.timeout)
            .await
            .map_err(|e| (PromotionStep::DomainReady, e))?;
        run.advance(PromotionState::DomainConfigReady, PromotionStep::DomainReady)?;

        let head = HealthVerifier::new(self.probe.clone(), cfg.probe_interval)
            .probe(&prod_url, cfg.prod_tries)
            .await;
        if head == 0 {
            return Err((
                PromotionStep::Health,
                ProvisionError::Verification(format!("prod HEAD check failed: {prod_url}")),
            ));
        }
        report.head_code = Some(head);

        let prod = self.source_checker(cfg.prod_tries).check(&prod_host, &slug).await;
        if !prod.passed() {
            return Err((
                PromotionStep::ProdVerify,
                ProvisionError::Verification(format!(
                    "prod sitehtml check failed: host={prod_host} sitehtml={} marker={}",
                    prod.code, prod.marker_ok
                )),
            ));
        }
        report.prod_check = Some(prod);
        run.advance(PromotionState::HealthVerified, PromotionStep::ProdVerify)?;

        if let Some(rec) = &run.record {
            let update = RecordUpdate::stage(Stage::Promoted)
                .expecting(rec.stage)
                .with_prod_url(prod_url.as_str())
                .with_note(report.audit_note());
            let updated = self
                .repo
                .update(rec.row, update)
                .await
                .map_err(|e| (PromotionStep::Persist, e))?;
            report.record = Some(updated);
        }
        run.advance(PromotionState::Promoted, PromotionStep::Persist)?;
        report.state = run.state.clone();

        tracing::info!(slug = %slug, prod_url = %prod_url, checks = %report.checks(), "Promoted");
        let id = run.record.as_ref().map(|r| r.id.as_str());
        notify::notify(
            self.notifier.as_ref(),
            &messages::promoted(&slug, id, &prod_url, &report.checks()),
        )
        .await;
        Ok(report)
    }

    async fn fail(
        &self,
        mut run: Run,
        step: PromotionStep,
        error: ProvisionError,
    ) -> PromotionFailure {
        let reason = error.to_string();
        if let Err(e) = run.state.advance(PromotionState::Failed {
            at: step,
            reason: reason.clone(),
        }) {
            tracing::warn!(error = %e, "Promotion state already terminal");
        }
        tracing::error!(slug = %run.slug, step = %step, error = %reason, "Promotion failed");

        let created = run.stack.created();
        let rollback = run.stack.unwind(&self.dns, &self.domains).await;
        if !rollback.is_clean() {
            tracing::warn!(slug = %run.slug, rollback = %rollback, "Rollback incomplete");
        }

        if !self.config.dry_run {
            self.persist_failure(&run, step, &reason).await;
            notify::notify(
                self.notifier.as_ref(),
                &messages::promote_failed(
                    &run.slug,
                    &step.to_string(),
                    &truncate(&reason, NOTE_ERROR_MAX),
                ),
            )
            .await;
        }

        PromotionFailure {
            slug: Some(run.slug),
            step,
            error,
            created,
            rollback,
        }
    }

    /// Record the failure. A record that is already `PROMOTED` keeps its
    /// stage and only gains the note.
    async fn persist_failure(&self, run: &Run, step: PromotionStep, reason: &str) {
        let Some(rec) = &run.record else {
            return;
        };
        let note = format!("promote:error(step:{step}, {})", truncate(reason, NOTE_ERROR_MAX));
        let update = if rec.stage == Stage::Promoted {
            RecordUpdate::default().with_note(note)
        } else {
            RecordUpdate::stage(Stage::PromoteError)
                .expecting(rec.stage)
                .with_note(note)
        };
        if let Err(e) = self.repo.update(rec.row, update).await {
            tracing::warn!(slug = %run.slug, error = %e, "Could not record promotion failure");
        }
    }
}
