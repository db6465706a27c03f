//! `DESIGN_DONE` → `DEV_DONE`: build the page from the design brief.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Outcome, StageRunner, lead_brief};
use crate::agent::{self, TextGenerator};
use crate::error::{ProvisionError, Result};
use crate::marker;
use crate::record::{RecordUpdate, TenantRecord, TenantRepository};
use crate::source::{LocalSites, SourceSnapshot};
use crate::stage::Stage;

pub struct DevBuildRunner {
    repo: Arc<dyn TenantRepository>,
    agent: Arc<dyn TextGenerator>,
    sites: LocalSites,
}

impl DevBuildRunner {
    pub fn new(
        repo: Arc<dyn TenantRepository>,
        agent: Arc<dyn TextGenerator>,
        sites: LocalSites,
    ) -> Self {
        Self { repo, agent, sites }
    }
}

#[async_trait]
impl StageRunner for DevBuildRunner {
    fn name(&self) -> &'static str {
        "dev"
    }

    fn triggers(&self) -> &'static [Stage] {
        &[Stage::DesignDone, Stage::DevError]
    }

    fn error_stage(&self) -> Stage {
        Stage::DevError
    }

    async fn process(&self, record: &TenantRecord) -> Result<Outcome> {
        let Some(slug) = record.slug() else {
            return Ok(Outcome::Skipped("no slug".into()));
        };
        let design = self.sites.read_design_spec(slug).await?.ok_or_else(|| {
            ProvisionError::Validation(format!("no design brief for {slug}"))
        })?;

        let input = format!("{}\n\nDESIGN_SPEC:\n{design}", lead_brief(record, slug));
        let raw = self
            .agent
            .complete(agent::BUILD_SYSTEM, &agent::build_prompt(&input))
            .await?;
        let html = agent::extract_html(&raw)
            .ok_or_else(|| ProvisionError::Verification("empty_html".into()))?;
        agent::quality_gate(&html)
            .map_err(|issue| ProvisionError::Verification(format!("qa:{issue}")))?;

        let html = marker::inject_marker(&html, slug);
        let path = self.sites.write_index(slug, &html).await?;
        let snapshot = SourceSnapshot::new(slug, "local", html);
        tracing::info!(
            id = %record.id,
            slug,
            path = %path.display(),
            digest = snapshot.short_digest(),
            "Page built"
        );

        self.repo
            .update(
                record.row,
                RecordUpdate::stage(Stage::DevDone)
                    .expecting(record.stage)
                    .with_note(format!("dev:done(sha256:{})", snapshot.short_digest())),
            )
            .await?;
        Ok(Outcome::Done)
    }
}
