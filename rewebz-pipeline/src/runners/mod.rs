//! Stage-gated batch runners.
//!
//! Each runner scans the record store for its trigger stages, processes up
//! to a per-invocation cap, and writes a new stage plus an audit note per
//! record. One record failing never stops the batch: the record is moved
//! to the runner's `*_ERROR` stage with the (truncated) error and the next
//! candidate is processed.

mod design;
mod dev_build;
mod dns_assign;
mod verify_live;

pub use design::DesignRunner;
pub use dev_build::DevBuildRunner;
pub use dns_assign::DnsAssignRunner;
pub use verify_live::{VerifyLiveConfig, VerifyLiveRunner};

use std::fmt;

use async_trait::async_trait;

use crate::error::{ProvisionError, Result, truncate};
use crate::record::{RecordUpdate, StageFilter, TenantRecord, TenantRepository};
use crate::stage::Stage;

/// Longest error text written into an audit note.
pub const ERROR_NOTE_MAX: usize = 400;

/// Default cap for runners that call a generation agent.
pub const AGENT_MAX_PER_RUN: usize = 1;
/// Default cap for the DNS and verification runners.
pub const DEFAULT_MAX_PER_RUN: usize = 50;

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The record advanced.
    Done,
    /// A gate was not met yet; the record stays where it is.
    Skipped(String),
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Prefix for notes and logs (`dns`, `design`, `dev`, `live`).
    fn name(&self) -> &'static str;

    fn triggers(&self) -> &'static [Stage];

    /// Stage a failed record is moved to.
    fn error_stage(&self) -> Stage;

    /// Extra per-record gate on top of the stage filter.
    fn eligible(&self, record: &TenantRecord) -> bool {
        record.slug().is_some()
    }

    /// Runs once before the scan.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Process one record, writing its success stage itself.
    async fn process(&self, record: &TenantRecord) -> Result<Outcome>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub scanned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} attempted={} ok={} failed={} skipped={}",
            self.scanned, self.attempted, self.succeeded, self.failed, self.skipped
        )
    }
}

/// Run one invocation of `runner`.
///
/// The cap counts attempted records (successes and failures); records
/// skipped at a gate do not count against it. Only a failed scan is an
/// error.
pub async fn run_batch(
    repo: &dyn TenantRepository,
    runner: &dyn StageRunner,
    max_per_run: usize,
) -> Result<BatchSummary> {
    let name = runner.name();
    if let Err(e) = runner.prepare().await {
        tracing::warn!(runner = name, error = %e, "Runner preparation failed, continuing");
    }

    let candidates = repo.scan(&StageFilter::any(runner.triggers())).await?;
    let mut summary = BatchSummary {
        scanned: candidates.len(),
        ..Default::default()
    };

    for record in candidates.iter().filter(|r| runner.eligible(r)) {
        if summary.attempted >= max_per_run {
            tracing::info!(runner = name, cap = max_per_run, "Per-run cap reached");
            break;
        }
        match runner.process(record).await {
            Ok(Outcome::Done) => {
                summary.attempted += 1;
                summary.succeeded += 1;
            }
            Ok(Outcome::Skipped(reason)) => {
                tracing::info!(runner = name, id = %record.id, %reason, "Skipped");
                summary.skipped += 1;
            }
            Err(e @ ProvisionError::StageConflict { .. }) => {
                tracing::info!(
                    runner = name,
                    id = %record.id,
                    error = %e,
                    "Record moved underneath us, skipping"
                );
                summary.skipped += 1;
            }
            Err(e) => {
                summary.attempted += 1;
                summary.failed += 1;
                tracing::error!(runner = name, id = %record.id, error = %e, "Record failed");
                mark_failed(repo, runner, record, &e).await;
            }
        }
    }

    tracing::info!(runner = name, %summary, "Batch finished");
    Ok(summary)
}

async fn mark_failed(
    repo: &dyn TenantRepository,
    runner: &dyn StageRunner,
    record: &TenantRecord,
    error: &ProvisionError,
) {
    let note = format!(
        "{}:error:{}",
        runner.name(),
        truncate(&error.to_string(), ERROR_NOTE_MAX)
    );
    let update = RecordUpdate::stage(runner.error_stage())
        .expecting(record.stage)
        .with_note(note);
    if let Err(e) = repo.update(record.row, update).await {
        tracing::warn!(
            runner = runner.name(),
            id = %record.id,
            error = %e,
            "Could not record failure"
        );
    }
}

/// Lead fields as a plain-text brief for the agents.
pub(crate) fn lead_brief(record: &TenantRecord, slug: &str) -> String {
    [
        format!("requestId: {}", record.id),
        format!("business_name: {}", record.business_name),
        format!("category: {}", record.category),
        format!("region: {}", record.region),
        format!("goal: {}", record.goal),
        format!("slug: {slug}"),
    ]
    .join("\n")
}
