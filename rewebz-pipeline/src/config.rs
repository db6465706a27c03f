//! Pipeline configuration: CLI flags with environment fallbacks, plus the
//! constructors that turn them into providers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::agent::{self, LlmClient, TextGenerator};
use crate::dns::{CloudflareDns, DnsRecordManager};
use crate::domain::{DomainAttachmentManager, VercelHost};
use crate::error::{ProvisionError, Result};
use crate::notify::{self, Notifier};
use crate::probe::{HttpSiteProbe, SiteProbe};
use crate::resolve::TenantDomains;
use crate::retry::RetryPolicy;
use crate::source::{GitOriginSource, LocalSites, ObjectStoreSource, SiteSource};
use crate::store::SqliteStore;

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct PipelineConfig {
    /// Production tenant suffix
    #[arg(long, env = "ROOT_DOMAIN", default_value = "rewebz.com", global = true)]
    pub root_domain: String,

    /// Preview tenant suffix (default: preview.<root-domain>)
    #[arg(long, env = "TENANT_ROOT_DOMAIN", global = true)]
    pub tenant_root_domain: Option<String>,

    /// CNAME target for tenant hosts
    #[arg(long, env = "CF_TARGET_CNAME", default_value = "cname.vercel-dns.com", global = true)]
    pub cname_target: String,

    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true, global = true)]
    pub cloudflare_token: Option<String>,

    #[arg(long, env = "CLOUDFLARE_ZONE_ID", global = true)]
    pub cloudflare_zone: Option<String>,

    #[arg(long, env = "CLOUDFLARE_API_BASE", global = true)]
    pub cloudflare_api_base: Option<String>,

    #[arg(long, env = "VERCEL_TOKEN", hide_env_values = true, global = true)]
    pub vercel_token: Option<String>,

    #[arg(long, env = "VERCEL_PROJECT_ID", global = true)]
    pub vercel_project: Option<String>,

    #[arg(long, env = "VERCEL_TEAM_SLUG", global = true)]
    pub vercel_team: Option<String>,

    #[arg(long, env = "VERCEL_API_BASE", global = true)]
    pub vercel_api_base: Option<String>,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true, global = true)]
    pub telegram_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_ID", global = true)]
    pub telegram_chat: Option<String>,

    /// Record store path
    #[arg(long, env = "REWEBZ_DB", default_value = "data/rewebz.db", global = true)]
    pub db: PathBuf,

    /// Local site directory (sites/<slug>/index.html)
    #[arg(long, env = "REWEBZ_SITES_DIR", default_value = "sites", global = true)]
    pub sites_dir: PathBuf,

    /// Public base URL of the object storage bucket
    #[arg(long, env = "R2_PUBLIC_BASE_URL", global = true)]
    pub r2_public_base: Option<String>,

    #[arg(long, env = "R2_KEY_PREFIX", default_value = "sites", global = true)]
    pub r2_prefix: String,

    /// Local clone whose remote branch holds the published sites
    #[arg(long, env = "REWEBZ_GIT_REPO", global = true)]
    pub git_repo: Option<PathBuf>,

    #[arg(long, env = "REWEBZ_GIT_REF", default_value = "origin/main", global = true)]
    pub git_ref: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, global = true)]
    pub anthropic_key: Option<String>,

    #[arg(long, env = "REWEBZ_AGENT_MODEL", default_value = agent::DEFAULT_MODEL, global = true)]
    pub agent_model: String,

    /// Request id prefix
    #[arg(long, env = "REWEBZ_ID_PREFIX", default_value = "rwz_", global = true)]
    pub id_prefix: String,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl PipelineConfig {
    pub fn domains(&self) -> TenantDomains {
        TenantDomains::new(&self.root_domain, self.tenant_root_domain.as_deref())
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        if let Some(parent) = self.db.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProvisionError::Store(format!("create {}: {e}", parent.display())))?;
        }
        Ok(Arc::new(SqliteStore::open(&self.db)?))
    }

    pub fn dns_manager(&self) -> Result<DnsRecordManager> {
        let (Some(token), Some(zone)) =
            (present(&self.cloudflare_token), present(&self.cloudflare_zone))
        else {
            return Err(ProvisionError::Fatal(
                "missing Cloudflare credentials: CLOUDFLARE_API_TOKEN / CLOUDFLARE_ZONE_ID".into(),
            ));
        };
        let mut provider = CloudflareDns::new(token, zone)?;
        if let Some(base) = present(&self.cloudflare_api_base) {
            provider = provider.with_api_base(base);
        }
        Ok(DnsRecordManager::new(Arc::new(provider), RetryPolicy::default()))
    }

    pub fn domain_manager(&self) -> Result<DomainAttachmentManager> {
        let (Some(token), Some(project)) =
            (present(&self.vercel_token), present(&self.vercel_project))
        else {
            return Err(ProvisionError::Fatal(
                "missing Vercel credentials: VERCEL_TOKEN / VERCEL_PROJECT_ID".into(),
            ));
        };
        let mut host = VercelHost::new(token, project, present(&self.vercel_team))?;
        if let Some(base) = present(&self.vercel_api_base) {
            host = host.with_api_base(base);
        }
        Ok(DomainAttachmentManager::new(Arc::new(host), RetryPolicy::default()))
    }

    pub fn probe(&self) -> Result<Arc<dyn SiteProbe>> {
        Ok(Arc::new(HttpSiteProbe::new(Duration::from_secs(15))?))
    }

    pub fn notifier(&self, disabled: bool) -> Arc<dyn Notifier> {
        notify::from_settings(
            self.telegram_token.as_deref(),
            self.telegram_chat.as_deref(),
            disabled,
        )
    }

    pub fn agent(&self) -> Result<Arc<dyn TextGenerator>> {
        let key = present(&self.anthropic_key)
            .ok_or_else(|| ProvisionError::Fatal("missing ANTHROPIC_API_KEY".into()))?;
        Ok(Arc::new(LlmClient::new(key)?.with_model(&self.agent_model)))
    }

    pub fn local_sites(&self) -> LocalSites {
        LocalSites::new(&self.sites_dir)
    }

    /// Where published sites are read from: object storage when configured,
    /// then a git origin, then the local directory.
    pub fn site_source(&self) -> Result<Arc<dyn SiteSource>> {
        if let Some(base) = present(&self.r2_public_base) {
            return Ok(Arc::new(ObjectStoreSource::new(base, &self.r2_prefix)?));
        }
        if let Some(repo) = &self.git_repo {
            return Ok(Arc::new(GitOriginSource::new(repo, &self.git_ref)));
        }
        Ok(Arc::new(self.local_sites()))
    }
}
