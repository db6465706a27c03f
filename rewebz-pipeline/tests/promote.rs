mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use rewebz_pipeline::dns::DnsAction;
use rewebz_pipeline::domain::DomainAction;
use rewebz_pipeline::error::ProvisionError;
use rewebz_pipeline::promote::{PromotionConfig, Promoter};
use rewebz_pipeline::record::{RecordKey, TenantRepository};
use rewebz_pipeline::resolve::{TargetRef, TargetResolver, TenantDomains};
use rewebz_pipeline::stage::{PromotionState, PromotionStep, Stage};
use rewebz_pipeline::store::SqliteStore;

const SLUG: &str = "acme-1234";
const PREVIEW_HOST: &str = "acme-1234.preview.example.com";
const PROD_HOST: &str = "acme-1234.example.com";
const PROD_URL: &str = "https://acme-1234.example.com";

struct Harness {
    store: Arc<SqliteStore>,
    dns: Arc<FakeDns>,
    domains: Arc<FakeDomains>,
    probe: Arc<FakeProbe>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: store(),
            dns: FakeDns::new(),
            domains: FakeDomains::new(),
            probe: FakeProbe::new(),
            notifier: RecordingNotifier::new(),
        }
    }

    /// Preview and production both serve the marked page.
    fn healthy(self) -> Self {
        self.probe.serve(PREVIEW_HOST, SLUG);
        self.probe.serve(PROD_HOST, SLUG);
        self.probe.head_status(PROD_URL, 200);
        self
    }

    fn promoter(&self, dry_run: bool) -> Promoter {
        self.promoter_over(self.store.clone(), dry_run)
    }

    fn promoter_over(&self, repo: Arc<dyn TenantRepository>, dry_run: bool) -> Promoter {
        let mut config = PromotionConfig::new(TenantDomains::new(ROOT, None), TARGET);
        config.timeout = Duration::from_millis(50);
        config.probe_interval = Duration::ZERO;
        config.dry_run = dry_run;
        Promoter::new(
            repo,
            self.dns.manager(),
            self.domains.manager(),
            self.probe.clone(),
            self.notifier.clone(),
            config,
        )
    }

    async fn record(&self) -> rewebz_pipeline::record::TenantRecord {
        self.store
            .get(&RecordKey::Slug(SLUG.into()))
            .await
            .unwrap()
            .unwrap()
    }
}

#[tokio::test]
async fn dev_done_tenant_is_promoted_end_to_end() {
    let h = Harness::new().healthy();
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;

    let report = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap();

    assert_eq!(report.prod_url, PROD_URL);
    assert_eq!(report.source_host, PREVIEW_HOST);
    assert_eq!(report.state, PromotionState::Promoted);
    assert_eq!(report.dns.action, DnsAction::Created);
    assert_eq!(report.domain.action, DomainAction::Create);
    assert_eq!(report.head_code, Some(200));

    let rec = h.record().await;
    assert_eq!(rec.stage, Stage::Promoted);
    assert_eq!(rec.prod_url.as_deref(), Some(PROD_URL));
    assert!(rec.audit_note.contains("promote:done(prod:https://acme-1234.example.com"));
    assert!(rec.audit_note.contains("marker:ok"));

    let cname = h.dns.named(PROD_HOST);
    assert_eq!(cname.len(), 1);
    assert_eq!(cname[0].record_type, "CNAME");
    assert_eq!(cname[0].content, TARGET);
    assert!(h.domains.is_attached_now(PROD_HOST));

    let sent = h.notifier.messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("PROMOTED"));
    assert!(sent[0].contains(PROD_URL));
}

#[tokio::test]
async fn rerunning_a_promotion_is_a_noop() {
    let h = Harness::new().healthy();
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;
    h.promoter(false).promote(&TargetRef::Slug(SLUG.into())).await.unwrap();
    let creates = h.dns.creates.load(Ordering::SeqCst);

    let again = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap();
    assert_eq!(again.dns.action, DnsAction::Noop);
    assert_eq!(again.domain.action, DomainAction::Noop);
    assert_eq!(h.dns.creates.load(Ordering::SeqCst), creates);
    assert_eq!(h.record().await.stage, Stage::Promoted);
}

#[tokio::test]
async fn failed_health_check_rolls_back_what_this_run_created() {
    let h = Harness::new();
    h.probe.serve(PREVIEW_HOST, SLUG);
    // Production never answers HEAD with 2xx/3xx.
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::Live, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::Health);
    assert!(failure.created.dns_record_id.is_some());
    assert_eq!(failure.created.domain_host.as_deref(), Some(PROD_HOST));
    assert!(failure.rollback.is_clean());
    assert_eq!(failure.rollback.undone.len(), 2);

    assert!(h.dns.named(PROD_HOST).is_empty());
    assert!(!h.domains.is_attached_now(PROD_HOST));

    let rec = h.record().await;
    assert_eq!(rec.stage, Stage::PromoteError);
    assert!(rec.audit_note.contains("promote:error(step:health"));
    assert!(rec.prod_url.is_none());
    assert!(h.notifier.messages().iter().any(|m| m.contains("PROMOTE_ERROR")));
}

#[tokio::test]
async fn production_serving_another_tenant_rolls_back() {
    let h = Harness::new();
    h.probe.serve(PREVIEW_HOST, SLUG);
    // Production answers, but with a page built for a different slug.
    h.probe.serve_html(PROD_HOST, SLUG, &page("acme-12345"));
    h.probe.head_status(PROD_URL, 200);
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::Live, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::ProdVerify);
    assert!(matches!(failure.error, ProvisionError::Verification(_)));
    assert!(failure.rollback.is_clean());
    assert_eq!(failure.rollback.undone.len(), 2);
    assert!(h.dns.named(PROD_HOST).is_empty());
    assert!(!h.domains.is_attached_now(PROD_HOST));

    let rec = h.record().await;
    assert_eq!(rec.stage, Stage::PromoteError);
    assert!(rec.audit_note.contains("promote:error(step:prod-verify"));
    assert!(rec.prod_url.is_none());
}

#[tokio::test]
async fn failed_rollback_is_reported_without_masking_the_cause() {
    let h = Harness::new().healthy();
    h.domains.ready.store(false, Ordering::SeqCst);
    h.domains.refuse_removal.store(true, Ordering::SeqCst);
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::DomainReady);
    assert!(matches!(failure.error, ProvisionError::PromotionTimeout { .. }));
    assert!(!failure.rollback.is_clean());
    assert_eq!(failure.rollback.failed.len(), 1);
    assert!(failure.rollback.failed[0].1.contains("remove denied"));
    // The DNS record is still undone after the detach fails.
    assert_eq!(failure.rollback.undone.len(), 1);
    assert!(h.dns.named(PROD_HOST).is_empty());
    assert!(h.domains.is_attached_now(PROD_HOST));
    assert!(failure.rollback.to_string().contains("failed"));

    let rec = h.record().await;
    assert_eq!(rec.stage, Stage::PromoteError);
    assert!(rec.audit_note.contains("promote:error(step:domain-ready"));
}

#[tokio::test]
async fn failed_persist_rolls_back() {
    let h = Harness::new().healthy();
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;
    let repo = Arc::new(RefusesPromotion {
        inner: h.store.clone(),
    });

    let failure = h
        .promoter_over(repo, false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::Persist);
    assert!(matches!(failure.error, ProvisionError::Store(_)));
    assert_eq!(failure.rollback.undone.len(), 2);
    assert!(h.dns.named(PROD_HOST).is_empty());
    assert!(!h.domains.is_attached_now(PROD_HOST));

    let rec = h.record().await;
    assert_eq!(rec.stage, Stage::PromoteError);
    assert!(rec.audit_note.contains("promote:error(step:persist"));
    assert!(rec.prod_url.is_none());
}

#[tokio::test]
async fn pre_existing_resources_survive_rollback() {
    let h = Harness::new();
    h.probe.serve(PREVIEW_HOST, SLUG);
    let existing = h.dns.seed("CNAME", PROD_HOST, TARGET);
    h.domains.attach(PROD_HOST);
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::Live, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::Health);
    assert!(failure.created.is_empty());
    assert!(failure.rollback.undone.is_empty());

    let records = h.dns.named(PROD_HOST);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, existing);
    assert!(h.domains.is_attached_now(PROD_HOST));
    assert_eq!(h.dns.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(h.domains.removes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn domain_timeout_reports_last_config_and_rolls_back() {
    let h = Harness::new().healthy();
    h.domains.ready.store(false, Ordering::SeqCst);
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::DomainReady);
    match &failure.error {
        ProvisionError::PromotionTimeout { host, last } => {
            assert_eq!(host, PROD_HOST);
            assert_eq!(last["misconfigured"], true);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.dns.named(PROD_HOST).is_empty());
    assert!(!h.domains.is_attached_now(PROD_HOST));
}

#[tokio::test]
async fn dry_run_mutates_nothing() {
    let h = Harness::new().healthy();
    let seeded = seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;

    let report = h
        .promoter(true)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.dns.action, DnsAction::Created);
    assert_eq!(report.domain.action, DomainAction::Create);
    assert_eq!(report.head_code, None);
    assert_eq!(h.dns.mutations(), 0);
    assert_eq!(h.domains.mutations(), 0);

    let rec = h.record().await;
    assert_eq!(rec.stage, Stage::DevDone);
    assert_eq!(rec.audit_note, seeded.audit_note);
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn unbuilt_record_is_rejected_before_any_remote_call() {
    let h = Harness::new().healthy();
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DesignDone, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::Resolve);
    assert!(matches!(failure.error, ProvisionError::Validation(_)));
    assert_eq!(h.probe.site_html_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.dns.mutations(), 0);
    assert_eq!(h.record().await.stage, Stage::DesignDone);
}

#[tokio::test]
async fn unverified_preview_stops_before_dns() {
    let h = Harness::new();
    seed(&h.store, "rwz_abc1234", "Acme Bakery", Stage::DevDone, Some(SLUG)).await;

    let failure = h
        .promoter(false)
        .promote(&TargetRef::Slug(SLUG.into()))
        .await
        .unwrap_err();

    assert_eq!(failure.step, PromotionStep::SourceVerify);
    assert_eq!(h.dns.mutations(), 0);
    assert_eq!(h.domains.mutations(), 0);
    assert_eq!(h.record().await.stage, Stage::PromoteError);
}

#[tokio::test]
async fn references_resolve_by_url_id_and_reject_garbage() {
    let store = store();
    seed(&store, "rwz_foo0001", "Foo", Stage::Live, Some("foo")).await;
    let domains = TenantDomains::new(ROOT, None);
    let resolver = TargetResolver::new(store.as_ref(), &domains, "rwz_");

    let by_url = resolver
        .resolve(&TargetRef::Url("https://foo.example.com".into()))
        .await
        .unwrap();
    assert_eq!(by_url.slug, "foo");
    assert!(by_url.record.is_some());
    assert_eq!(by_url.source_hint_host.as_deref(), Some("foo.example.com"));

    let by_id = resolver
        .resolve(&TargetRef::Freeform("rwz_foo0001".into()))
        .await
        .unwrap();
    assert_eq!(by_id.slug, "foo");

    let err = resolver
        .resolve(&TargetRef::Slug("FOO_1".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));

    let err = resolver
        .resolve(&TargetRef::Freeform("FOO_1".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::AmbiguousReference(_)));
}
