//! Target resolution: turn a slug, request id, URL or loose token into a
//! canonical tenant slug and its record.

use crate::error::{ProvisionError, Result};
use crate::record::{RecordKey, TenantRecord, TenantRepository};
use crate::slug::is_valid_slug;

/// The shared domains tenants live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDomains {
    /// Production suffix, e.g. `rewebz.com`.
    pub root: String,
    /// Preview suffix, e.g. `preview.rewebz.com`.
    pub tenant_root: String,
}

fn clean_domain(d: &str) -> String {
    d.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl TenantDomains {
    pub fn new(root: &str, tenant_root: Option<&str>) -> Self {
        let root = clean_domain(root);
        let tenant_root = tenant_root
            .map(clean_domain)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("preview.{root}"));
        Self { root, tenant_root }
    }

    pub fn prod_host(&self, slug: &str) -> String {
        format!("{slug}.{}", self.root)
    }

    pub fn preview_host(&self, slug: &str) -> String {
        format!("{slug}.{}", self.tenant_root)
    }

    /// Known tenant suffixes, longest first so `preview.x.com` wins over `x.com`.
    pub fn suffixes(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for s in [
            self.tenant_root.clone(),
            self.root.clone(),
            format!("preview.{}", self.root),
        ] {
            if !s.is_empty() && !out.contains(&s) {
                out.push(s);
            }
        }
        out.sort_by(|a, b| b.len().cmp(&a.len()));
        out
    }

    /// Tenant slug encoded in `host`, if any. Bare and `www.` roots are not tenants.
    pub fn slug_from_host(&self, host: &str) -> Option<String> {
        let host = clean_domain(host);
        if host.is_empty() {
            return None;
        }
        for suffix in self.suffixes() {
            if host == suffix || host == format!("www.{suffix}") {
                return None;
            }
            if let Some(label) = host.strip_suffix(&format!(".{suffix}"))
                && is_valid_slug(label)
            {
                return Some(label.to_string());
            }
        }
        None
    }

    /// Host whose preview content a promotion verifies before touching production.
    ///
    /// Preference: an explicit hint (the URL the operator passed), then the
    /// configured preview suffix, then the record's stored preview URL, then
    /// `preview.<root>`.
    pub fn source_host(&self, slug: &str, preview_url: Option<&str>, hint: Option<&str>) -> String {
        if let Some(h) = hint.and_then(host_from_url) {
            return h;
        }
        if self.tenant_root.starts_with("preview.") || self.tenant_root.contains(".preview.") {
            return self.preview_host(slug);
        }
        if let Some(h) = preview_url.and_then(host_from_url) {
            return h;
        }
        format!("{slug}.preview.{}", self.root)
    }
}

/// Lowercased hostname of a URL, tolerating a missing scheme.
pub fn host_from_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = url::Url::parse(raw)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| url::Url::parse(&format!("https://{raw}")).ok())?;
    parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
}

/// What the operator pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    Slug(String),
    Id(String),
    Url(String),
    /// Could be any of the above.
    Freeform(String),
}

impl TargetRef {
    /// Pick the reference from CLI options, in priority order slug, id, url, freeform.
    pub fn from_options(
        slug: Option<&str>,
        id: Option<&str>,
        url: Option<&str>,
        freeform: Option<&str>,
    ) -> Result<Self> {
        let pick = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        if let Some(s) = pick(slug) {
            return Ok(TargetRef::Slug(s));
        }
        if let Some(s) = pick(id) {
            return Ok(TargetRef::Id(s));
        }
        if let Some(s) = pick(url) {
            return Ok(TargetRef::Url(s));
        }
        if let Some(s) = pick(freeform) {
            return Ok(TargetRef::Freeform(s));
        }
        Err(ProvisionError::Validation(
            "missing target: use one of --slug <slug> | --id <requestId> | --url <previewUrl> | --ref <value>"
                .into(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub slug: String,
    pub record: Option<TenantRecord>,
    /// Host taken from a URL reference, used as the preview source.
    pub source_hint_host: Option<String>,
}

pub struct TargetResolver<'a> {
    repo: &'a dyn TenantRepository,
    domains: &'a TenantDomains,
    id_prefix: &'a str,
}

impl<'a> TargetResolver<'a> {
    pub fn new(
        repo: &'a dyn TenantRepository,
        domains: &'a TenantDomains,
        id_prefix: &'a str,
    ) -> Self {
        Self {
            repo,
            domains,
            id_prefix,
        }
    }

    pub async fn resolve(&self, target: &TargetRef) -> Result<ResolvedTarget> {
        match target {
            TargetRef::Slug(s) => self.by_slug(s.trim(), None).await,
            TargetRef::Id(id) => self.by_id(id.trim()).await,
            TargetRef::Url(u) => {
                let (slug, host) = self.slug_from_url(u).ok_or_else(|| {
                    ProvisionError::Validation(format!("could not extract slug from URL: {u}"))
                })?;
                self.by_slug(&slug, Some(host)).await
            }
            TargetRef::Freeform(raw) => {
                let raw = raw.trim();
                let looks_like_url =
                    raw.starts_with("http://") || raw.starts_with("https://") || raw.contains('.');
                if looks_like_url && let Some((slug, host)) = self.slug_from_url(raw) {
                    return self.by_slug(&slug, Some(host)).await;
                }
                if self.looks_like_id(raw) {
                    return self.by_id(raw).await;
                }
                if is_valid_slug(raw) {
                    return self.by_slug(raw, None).await;
                }
                Err(ProvisionError::AmbiguousReference(raw.to_string()))
            }
        }
    }

    fn looks_like_id(&self, raw: &str) -> bool {
        !self.id_prefix.is_empty()
            && raw.len() > self.id_prefix.len()
            && raw
                .get(..self.id_prefix.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(self.id_prefix))
    }

    fn slug_from_url(&self, raw: &str) -> Option<(String, String)> {
        let host = host_from_url(raw)?;
        let slug = self.domains.slug_from_host(&host)?;
        Some((slug, host))
    }

    async fn by_slug(&self, slug: &str, hint: Option<String>) -> Result<ResolvedTarget> {
        if !is_valid_slug(slug) {
            return Err(ProvisionError::Validation(format!("invalid slug: {slug}")));
        }
        let record = self.repo.get(&RecordKey::Slug(slug.to_string())).await?;
        Ok(ResolvedTarget {
            slug: slug.to_string(),
            record,
            source_hint_host: hint,
        })
    }

    async fn by_id(&self, id: &str) -> Result<ResolvedTarget> {
        let record = self
            .repo
            .get(&RecordKey::Id(id.to_string()))
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("no tenant record with id {id}")))?;
        let slug = record
            .slug()
            .map(str::to_lowercase)
            .filter(|s| is_valid_slug(s))
            .ok_or_else(|| {
                ProvisionError::Validation(format!("record {id} has a missing or invalid slug"))
            })?;
        Ok(ResolvedTarget {
            slug,
            record: Some(record),
            source_hint_host: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> TenantDomains {
        TenantDomains::new("example.com", None)
    }

    #[test]
    fn suffixes_longest_first() {
        assert_eq!(domains().suffixes(), ["preview.example.com", "example.com"]);
        let custom = TenantDomains::new("example.com", Some("sites.example.net"));
        assert_eq!(
            custom.suffixes(),
            ["preview.example.com", "sites.example.net", "example.com"]
        );
    }

    #[test]
    fn slug_from_host_matches_suffixes() {
        let d = domains();
        assert_eq!(d.slug_from_host("foo.example.com").as_deref(), Some("foo"));
        assert_eq!(d.slug_from_host("foo.preview.example.com").as_deref(), Some("foo"));
        assert_eq!(d.slug_from_host("FOO.Example.com.").as_deref(), Some("foo"));
        assert_eq!(d.slug_from_host("example.com"), None);
        assert_eq!(d.slug_from_host("www.example.com"), None);
        assert_eq!(d.slug_from_host("foo.other.org"), None);
        assert_eq!(d.slug_from_host("a.b.example.com"), None);
    }

    #[test]
    fn host_parsing() {
        assert_eq!(
            host_from_url("https://Foo.example.com/x?y").as_deref(),
            Some("foo.example.com")
        );
        assert_eq!(host_from_url("foo.example.com").as_deref(), Some("foo.example.com"));
        assert_eq!(host_from_url("foo.example.com/path").as_deref(), Some("foo.example.com"));
        assert_eq!(host_from_url("   "), None);
    }

    #[test]
    fn source_host_preference() {
        let d = domains();
        assert_eq!(
            d.source_host("acme", None, Some("https://acme.preview.example.com")),
            "acme.preview.example.com"
        );
        assert_eq!(d.source_host("acme", None, None), "acme.preview.example.com");

        let legacy = TenantDomains::new("example.com", Some("example.com"));
        assert_eq!(
            legacy.source_host("acme", Some("https://acme.staging.example.com"), None),
            "acme.staging.example.com"
        );
        assert_eq!(legacy.source_host("acme", None, None), "acme.preview.example.com");
    }

    #[test]
    fn target_ref_priority() {
        let url = Some("https://a.example.com");
        let r = TargetRef::from_options(Some(" "), Some("rwz_1"), url, None).unwrap();
        assert_eq!(r, TargetRef::Id("rwz_1".into()));
        assert!(TargetRef::from_options(None, None, None, None).is_err());
    }
}
