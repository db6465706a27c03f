//! `NEW` → `DNS_DONE`: give the lead a slug and point its preview host at
//! the hosting provider.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, StageRunner};
use crate::dns::DnsRecordManager;
use crate::error::Result;
use crate::record::{RecordUpdate, TenantRecord, TenantRepository};
use crate::resolve::TenantDomains;
use crate::slug::{self, SlugRepair};
use crate::stage::Stage;

pub struct DnsAssignRunner {
    repo: Arc<dyn TenantRepository>,
    dns: DnsRecordManager,
    domains: TenantDomains,
    cname_target: String,
}

impl DnsAssignRunner {
    pub fn new(
        repo: Arc<dyn TenantRepository>,
        dns: DnsRecordManager,
        domains: TenantDomains,
        cname_target: &str,
    ) -> Self {
        Self {
            repo,
            dns,
            domains,
            cname_target: cname_target.to_string(),
        }
    }

    /// Slug to use for `record`, deleting the DNS name of a repaired slug.
    async fn settle_slug(&self, record: &TenantRecord) -> Result<String> {
        let fresh = || slug::normalize(&record.business_name, &slug::id_suffix(&record.id));
        let Some(existing) = record.slug() else {
            return Ok(fresh());
        };
        match slug::repair(existing) {
            SlugRepair::Valid(s) => Ok(s),
            SlugRepair::Repaired { old, new } => {
                let stale = self.domains.preview_host(&old);
                let removed = self.dns.delete_by_name(&stale).await?;
                tracing::info!(id = %record.id, %old, %new, removed, "Repaired invalid slug");
                Ok(new)
            }
            SlugRepair::Unrepairable { old } => {
                let new = fresh();
                tracing::info!(id = %record.id, %old, %new, "Replaced unrepairable slug");
                Ok(new)
            }
        }
    }
}

#[async_trait]
impl StageRunner for DnsAssignRunner {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn triggers(&self) -> &'static [Stage] {
        &[Stage::New, Stage::DnsError]
    }

    fn error_stage(&self) -> Stage {
        Stage::DnsError
    }

    /// `NEW` always; `DNS_ERROR` only once a slug was persisted, so a retry
    /// reuses it.
    fn eligible(&self, record: &TenantRecord) -> bool {
        match record.stage {
            Stage::New => true,
            _ => record.slug().is_some(),
        }
    }

    async fn process(&self, record: &TenantRecord) -> Result<Outcome> {
        let slug = self.settle_slug(record).await?;
        if record.slug() != Some(slug.as_str()) {
            // Persist before touching DNS so a failed run retries the same name.
            self.repo
                .update(record.row, RecordUpdate::default().with_slug(slug.as_str()))
                .await?;
        }

        let host = self.domains.preview_host(&slug);
        let upsert = self.dns.upsert_cname(&host, &self.cname_target).await?;
        let preview_url = format!("https://{host}");

        self.repo
            .update(
                record.row,
                RecordUpdate::stage(Stage::DnsDone)
                    .expecting(record.stage)
                    .with_preview_url(preview_url.as_str())
                    .with_note(format!("dns:{}", upsert.action)),
            )
            .await?;
        tracing::info!(
            id = %record.id,
            %slug,
            %host,
            action = %upsert.action,
            "Preview DNS assigned"
        );
        Ok(Outcome::Done)
    }
}
