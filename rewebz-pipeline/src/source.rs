//! Where tenant HTML lives before the edge serves it.
//!
//! Three origins implement [`SiteSource`]: a local `sites/` directory (what
//! the build runner writes), object storage read through its public base
//! URL, and a git remote branch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::error::{ProvisionError, Result};

pub const INDEX_FILE: &str = "index.html";
pub const DESIGN_SPEC_FILE: &str = "DESIGN_SPEC.md";

/// HTML for one `(slug, version)`, with its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub slug: String,
    pub version: String,
    pub html: String,
    /// Lowercase hex SHA-256 of `html`.
    pub digest: String,
}

impl SourceSnapshot {
    pub fn new(slug: &str, version: &str, html: String) -> Self {
        let digest: String = Sha256::digest(html.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Self {
            slug: slug.to_string(),
            version: version.to_string(),
            html,
            digest,
        }
    }

    /// First 12 hex chars, for audit notes.
    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

#[async_trait]
pub trait SiteSource: Send + Sync {
    /// Short label for notes and logs (`local`, `r2`, `git:origin/main`).
    fn label(&self) -> String;

    /// Bring the view of the origin up to date. Best effort.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, slug: &str) -> Result<bool>;

    async fn snapshot(&self, slug: &str) -> Result<Option<SourceSnapshot>>;
}

/// `<root>/<slug>/index.html` and `<root>/<slug>/DESIGN_SPEC.md` on disk.
#[derive(Debug, Clone)]
pub struct LocalSites {
    root: PathBuf,
}

impl LocalSites {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn site_dir(&self, slug: &str) -> PathBuf {
        self.root.join(slug)
    }

    pub fn index_path(&self, slug: &str) -> PathBuf {
        self.site_dir(slug).join(INDEX_FILE)
    }

    pub fn design_spec_path(&self, slug: &str) -> PathBuf {
        self.site_dir(slug).join(DESIGN_SPEC_FILE)
    }

    pub async fn has_design_spec(&self, slug: &str) -> bool {
        tokio::fs::try_exists(self.design_spec_path(slug))
            .await
            .unwrap_or(false)
    }

    pub async fn read_design_spec(&self, slug: &str) -> Result<Option<String>> {
        read_optional(&self.design_spec_path(slug)).await
    }

    pub async fn write_design_spec(&self, slug: &str, spec: &str) -> Result<PathBuf> {
        let path = self.design_spec_path(slug);
        write_file(&path, spec).await?;
        Ok(path)
    }

    pub async fn write_index(&self, slug: &str, html: &str) -> Result<PathBuf> {
        let path = self.index_path(slug);
        write_file(&path, html).await?;
        Ok(path)
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProvisionError::Fatal(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    let io = |e: std::io::Error| {
        ProvisionError::Fatal(format!("failed to write {}: {e}", path.display()))
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io)?;
    }
    tokio::fs::write(path, content).await.map_err(io)
}

#[async_trait]
impl SiteSource for LocalSites {
    fn label(&self) -> String {
        "local".into()
    }

    async fn exists(&self, slug: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.index_path(slug))
            .await
            .unwrap_or(false))
    }

    async fn snapshot(&self, slug: &str) -> Result<Option<SourceSnapshot>> {
        Ok(read_optional(&self.index_path(slug))
            .await?
            .map(|html| SourceSnapshot::new(slug, "local", html)))
    }
}

/// `_live.json` pointer written next to each versioned upload.
#[derive(Debug, Deserialize)]
struct LivePointer {
    #[serde(default)]
    key: String,
    #[serde(default)]
    version: String,
}

/// Object storage read through a public base URL.
///
/// Layout: `<prefix>/<slug>/_live.json` names the current
/// `<prefix>/<slug>/<version>/index.html`. Older uploads sit at
/// `<prefix>/<slug>/index.html` with no pointer.
pub struct ObjectStoreSource {
    http: reqwest::Client,
    public_base: String,
    prefix: String,
}

impl ObjectStoreSource {
    pub fn new(public_base: &str, prefix: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            public_base: public_base.trim().trim_end_matches('/').to_string(),
            prefix: prefix.trim().trim_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key.trim_start_matches('/'))
    }

    pub fn pointer_key(&self, slug: &str) -> String {
        format!("{}/{slug}/_live.json", self.prefix)
    }

    pub fn legacy_key(&self, slug: &str) -> String {
        format!("{}/{slug}/{INDEX_FILE}", self.prefix)
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>> {
        let resp = self.http.get(self.object_url(key)).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProvisionError::from_status("object get", status, &body));
        }
        let text = resp.text().await?;
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    async fn pointer(&self, slug: &str) -> Result<Option<LivePointer>> {
        let Some(raw) = self.get_text(&self.pointer_key(slug)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str::<LivePointer>(&raw)
            .ok()
            .filter(|p| !p.key.is_empty() && !p.version.is_empty()))
    }
}

#[async_trait]
impl SiteSource for ObjectStoreSource {
    fn label(&self) -> String {
        "r2".into()
    }

    async fn exists(&self, slug: &str) -> Result<bool> {
        let key = match self.pointer(slug).await? {
            Some(pointer) => pointer.key,
            None => self.legacy_key(slug),
        };
        let resp = self.http.head(self.object_url(&key)).send().await?;
        Ok(resp.status().is_success())
    }

    async fn snapshot(&self, slug: &str) -> Result<Option<SourceSnapshot>> {
        if let Some(pointer) = self.pointer(slug).await? {
            match self.get_text(&pointer.key).await {
                Ok(Some(html)) => {
                    return Ok(Some(SourceSnapshot::new(slug, &pointer.version, html)));
                }
                Ok(None) => {
                    tracing::warn!(slug, key = %pointer.key, "Live pointer names a missing object")
                }
                Err(e) => {
                    tracing::warn!(
                        slug,
                        key = %pointer.key,
                        error = %e,
                        "Failed to read live object"
                    )
                }
            }
        }
        Ok(self
            .get_text(&self.legacy_key(slug))
            .await?
            .map(|html| SourceSnapshot::new(slug, "legacy", html)))
    }
}

/// Sites committed to a git remote branch, read from a local clone.
pub struct GitOriginSource {
    repo: PathBuf,
    git_ref: String,
    timeout: Duration,
}

impl GitOriginSource {
    pub fn new(repo: impl Into<PathBuf>, git_ref: &str) -> Self {
        Self {
            repo: repo.into(),
            git_ref: git_ref.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    fn site_file(slug: &str) -> String {
        format!("sites/{slug}/{INDEX_FILE}")
    }

    /// Run git with a timeout; returns stdout on success.
    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("git")
                .args(args)
                .current_dir(&self.repo)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ProvisionError::Transient(format!("git {} timed out", args.join(" "))))?
        .map_err(|e| ProvisionError::Fatal(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::Fatal(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                crate::error::truncate(stderr.trim(), 300)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SiteSource for GitOriginSource {
    fn label(&self) -> String {
        format!("git:{}", self.git_ref)
    }

    async fn refresh(&self) -> Result<()> {
        let Some((remote, branch)) = self.git_ref.split_once('/') else {
            return Ok(());
        };
        self.git(&["fetch", remote, branch, "--quiet"]).await.map(|_| ())
    }

    async fn exists(&self, slug: &str) -> Result<bool> {
        let file = Self::site_file(slug);
        let out = self
            .git(&["ls-tree", "-r", "--name-only", &self.git_ref, "--", &file])
            .await?;
        Ok(out.lines().any(|l| l.trim() == file))
    }

    async fn snapshot(&self, slug: &str) -> Result<Option<SourceSnapshot>> {
        if !self.exists(slug).await? {
            return Ok(None);
        }
        let spec = format!("{}:{}", self.git_ref, Self::site_file(slug));
        let html = self.git(&["show", &spec]).await?;
        let version = self
            .git(&["rev-parse", "--short", &self.git_ref])
            .await
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| self.git_ref.clone());
        Ok(Some(SourceSnapshot::new(slug, &version, html)))
    }
}
