//! `DNS_DONE` → `DESIGN_DONE`: write a design brief for the site.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, StageRunner, lead_brief};
use crate::agent::{self, TextGenerator};
use crate::error::{ProvisionError, Result};
use crate::record::{RecordUpdate, TenantRecord, TenantRepository};
use crate::source::LocalSites;
use crate::stage::Stage;

pub struct DesignRunner {
    repo: Arc<dyn TenantRepository>,
    agent: Arc<dyn TextGenerator>,
    sites: LocalSites,
}

impl DesignRunner {
    pub fn new(
        repo: Arc<dyn TenantRepository>,
        agent: Arc<dyn TextGenerator>,
        sites: LocalSites,
    ) -> Self {
        Self { repo, agent, sites }
    }
}

#[async_trait]
impl StageRunner for DesignRunner {
    fn name(&self) -> &'static str {
        "design"
    }

    fn triggers(&self) -> &'static [Stage] {
        &[Stage::DnsDone, Stage::DesignError]
    }

    fn error_stage(&self) -> Stage {
        Stage::DesignError
    }

    async fn process(&self, record: &TenantRecord) -> Result<Outcome> {
        let Some(slug) = record.slug() else {
            return Ok(Outcome::Skipped("no slug".into()));
        };

        // An existing brief is kept; the operator may have edited it.
        let note = if self.sites.has_design_spec(slug).await {
            "design-spec:kept".to_string()
        } else {
            let raw = self
                .agent
                .complete(agent::DESIGN_SYSTEM, &agent::design_prompt(&lead_brief(record, slug)))
                .await?;
            if raw.trim().is_empty() {
                return Err(ProvisionError::Verification("design agent returned nothing".into()));
            }
            let path = self
                .sites
                .write_design_spec(slug, &agent::normalize_design_spec(&raw))
                .await?;
            tracing::info!(id = %record.id, slug, path = %path.display(), "Design brief written");
            "design-spec:done".to_string()
        };

        self.repo
            .update(
                record.row,
                RecordUpdate::stage(Stage::DesignDone)
                    .expecting(record.stage)
                    .with_note(note),
            )
            .await?;
        Ok(Outcome::Done)
    }
}
