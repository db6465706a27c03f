//! rewebz: tenant pipeline CLI.
//!
//!   rewebz add-lead --business-name "Acme Bakery"    insert a NEW tenant
//!   rewebz assign-dns                                slug + preview CNAME
//!   rewebz design                                    design brief
//!   rewebz dev-build                                 build the page
//!   rewebz verify-live                               verify preview, mark LIVE
//!   rewebz promote <ref> [--dry-run]                 preview → production

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rewebz_pipeline::config::PipelineConfig;
use rewebz_pipeline::promote::{PromotionConfig, Promoter};
use rewebz_pipeline::record::{NewTenant, TenantRepository, new_request_id};
use rewebz_pipeline::resolve::TargetRef;
use rewebz_pipeline::runners::{
    self, AGENT_MAX_PER_RUN, DEFAULT_MAX_PER_RUN, DesignRunner, DevBuildRunner, DnsAssignRunner,
    StageRunner, VerifyLiveConfig, VerifyLiveRunner,
};

#[derive(Parser)]
#[command(name = "rewebz", about = "Provision and promote rewebz tenant sites")]
struct Cli {
    #[command(flatten)]
    config: PipelineConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Promote a verified preview to its production host
    Promote(PromoteArgs),
    /// Assign slugs and preview DNS to NEW leads
    AssignDns(RunArgs),
    /// Write design briefs for tenants with DNS
    Design(RunArgs),
    /// Build pages from design briefs
    DevBuild(RunArgs),
    /// Verify built previews and mark them LIVE
    VerifyLive(VerifyArgs),
    /// Insert a NEW tenant record
    AddLead(LeadArgs),
}

#[derive(Args)]
struct PromoteArgs {
    /// Slug, request id, or URL
    reference: Option<String>,

    #[arg(long)]
    slug: Option<String>,

    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    url: Option<String>,

    /// Freeform reference (same as the positional argument)
    #[arg(long = "ref")]
    freeform: Option<String>,

    /// Report what would change without mutating anything
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_telegram: bool,

    /// Bound on the domain readiness wait, in seconds
    #[arg(long = "timeoutSec", alias = "timeout-sec", default_value_t = 600)]
    timeout_sec: u64,
}

#[derive(Args)]
struct RunArgs {
    /// Records to attempt this run (default depends on the runner)
    #[arg(long)]
    max_per_run: Option<usize>,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Skip the LIVE notification
    #[arg(long)]
    no_telegram: bool,
}

#[derive(Args)]
struct LeadArgs {
    #[arg(long)]
    business_name: String,

    #[arg(long, default_value = "")]
    category: String,

    #[arg(long, default_value = "")]
    region: String,

    #[arg(long, default_value = "")]
    goal: String,

    /// Request id (generated when omitted)
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs for schedulers (REWEBZ_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("REWEBZ_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rewebz_pipeline=info,rewebz=info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let config = &cli.config;
    match cli.command {
        Command::Promote(args) => promote(config, args).await,
        Command::AssignDns(args) => {
            let store = config.open_store()?;
            let runner = DnsAssignRunner::new(
                store.clone(),
                config.dns_manager()?,
                config.domains(),
                &config.cname_target,
            );
            let max_per_run = args.max_per_run.unwrap_or(DEFAULT_MAX_PER_RUN);
            run(store.as_ref(), &runner, max_per_run).await
        }
        Command::Design(args) => {
            let store = config.open_store()?;
            let runner = DesignRunner::new(store.clone(), config.agent()?, config.local_sites());
            run(store.as_ref(), &runner, args.max_per_run.unwrap_or(AGENT_MAX_PER_RUN)).await
        }
        Command::DevBuild(args) => {
            let store = config.open_store()?;
            let runner = DevBuildRunner::new(store.clone(), config.agent()?, config.local_sites());
            run(store.as_ref(), &runner, args.max_per_run.unwrap_or(AGENT_MAX_PER_RUN)).await
        }
        Command::VerifyLive(args) => {
            let store = config.open_store()?;
            let runner = VerifyLiveRunner::new(
                store.clone(),
                config.site_source()?,
                config.probe()?,
                config.domains(),
                config.notifier(args.no_telegram),
                VerifyLiveConfig::default(),
            );
            let max_per_run = args.run.max_per_run.unwrap_or(DEFAULT_MAX_PER_RUN);
            run(store.as_ref(), &runner, max_per_run).await
        }
        Command::AddLead(args) => add_lead(config, args).await,
    }
}

async fn run(
    repo: &dyn TenantRepository,
    runner: &dyn StageRunner,
    max_per_run: usize,
) -> Result<()> {
    let summary = runners::run_batch(repo, runner, max_per_run)
        .await
        .with_context(|| format!("{} runner failed", runner.name()))?;
    println!(
        "{}",
        serde_json::json!({
            "ok": true,
            "runner": runner.name(),
            "scanned": summary.scanned,
            "attempted": summary.attempted,
            "succeeded": summary.succeeded,
            "failed": summary.failed,
            "skipped": summary.skipped,
        })
    );
    Ok(())
}

async fn promote(config: &PipelineConfig, args: PromoteArgs) -> Result<()> {
    let freeform = args.freeform.as_deref().or(args.reference.as_deref());
    let target = TargetRef::from_options(
        args.slug.as_deref(),
        args.id.as_deref(),
        args.url.as_deref(),
        freeform,
    )?;

    let mut promotion = PromotionConfig::new(config.domains(), &config.cname_target);
    promotion.timeout = Duration::from_secs(args.timeout_sec);
    promotion.dry_run = args.dry_run;
    promotion.id_prefix = config.id_prefix.clone();

    let promoter = Promoter::new(
        config.open_store()?,
        config.dns_manager()?,
        config.domain_manager()?,
        config.probe()?,
        config.notifier(args.no_telegram),
        promotion,
    );

    match promoter.promote(&target).await {
        Ok(report) => {
            println!(
                "{}",
                serde_json::json!({
                    "ok": true,
                    "dryRun": report.dry_run,
                    "slug": report.slug,
                    "sourceHost": report.source_host,
                    "prodUrl": report.prod_url,
                    "checks": report.checks(),
                })
            );
            Ok(())
        }
        Err(failure) => {
            eprintln!(
                "promote failed: step={} error={} created=[{}] rollback=[{}]",
                failure.step, failure.error, failure.created, failure.rollback
            );
            Err(failure.into())
        }
    }
}

async fn add_lead(config: &PipelineConfig, args: LeadArgs) -> Result<()> {
    let store = config.open_store()?;
    let id = args
        .id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| new_request_id(&config.id_prefix));
    let record = store
        .insert(NewTenant {
            id,
            business_name: args.business_name,
            category: args.category,
            region: args.region,
            goal: args.goal,
        })
        .await?;
    tracing::info!(id = %record.id, row = record.row, "Lead added");
    println!("{}", serde_json::json!({ "ok": true, "id": record.id, "row": record.row }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_telegram_is_only_accepted_where_something_notifies() {
        let args = ["rewebz", "verify-live", "--no-telegram", "--max-per-run", "3"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::VerifyLive(args) => {
                assert!(args.no_telegram);
                assert_eq!(args.run.max_per_run, Some(3));
            }
            _ => panic!("expected verify-live"),
        }

        for runner in ["assign-dns", "design", "dev-build"] {
            assert!(Cli::try_parse_from(["rewebz", runner, "--no-telegram"]).is_err());
        }
        assert!(Cli::try_parse_from(["rewebz", "promote", "acme", "--no-telegram"]).is_ok());
    }
}
