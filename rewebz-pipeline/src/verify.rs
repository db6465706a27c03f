//! Source availability and health checks.
//!
//! Both checks report outcomes as values rather than errors: the caller
//! decides whether a failed check is fatal.

use std::sync::Arc;
use std::time::Duration;

use crate::marker::has_marker;
use crate::probe::SiteProbe;
use crate::retry::RetryPolicy;

/// Delay between probe attempts; covers edge propagation after a deploy.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(2500);

/// Outcome of a content-introspection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCheck {
    /// Last HTTP status seen; 0 if no response ever arrived.
    pub code: u16,
    pub marker_ok: bool,
}

impl SourceCheck {
    pub fn passed(&self) -> bool {
        self.code != 0 && self.marker_ok
    }
}

/// Confirms a hostname serves *this* tenant's content, not just any page.
pub struct SourceChecker {
    probe: Arc<dyn SiteProbe>,
    policy: RetryPolicy,
}

impl SourceChecker {
    pub fn new(probe: Arc<dyn SiteProbe>, policy: RetryPolicy) -> Self {
        Self { probe, policy }
    }

    /// Poll `host`'s introspection endpoint until it answers as tenant `slug`.
    ///
    /// Stops at the first matching envelope and reports whether its HTML
    /// carries the build marker. A missing marker is not retried: the edge
    /// answered with this tenant's content and that content is unmarked.
    pub async fn check(&self, host: &str, slug: &str) -> SourceCheck {
        let attempts = self.policy.attempts();
        let mut last_code = 0;
        for attempt in 0..attempts {
            match self.probe.site_html(host).await {
                Ok(resp) => {
                    last_code = resp.status;
                    if resp.is_success()
                        && let Some(env) = resp.envelope.as_ref()
                        && env.serves_tenant(slug)
                    {
                        let marker_ok = env.html.as_deref().is_some_and(|h| has_marker(h, slug));
                        tracing::debug!(
                            host,
                            slug,
                            code = resp.status,
                            marker_ok,
                            "Source check answered"
                        );
                        return SourceCheck {
                            code: resp.status,
                            marker_ok,
                        };
                    }
                    tracing::debug!(
                        host,
                        slug,
                        code = resp.status,
                        attempt,
                        "Source not served yet"
                    );
                }
                Err(e) => {
                    tracing::debug!(host, slug, attempt, error = %e, "Source check request failed")
                }
            }
            if attempt + 1 < attempts {
                self.policy.pause(attempt).await;
            }
        }
        SourceCheck {
            code: last_code,
            marker_ok: false,
        }
    }
}

/// HEAD-probes public URLs.
pub struct HealthVerifier {
    probe: Arc<dyn SiteProbe>,
    interval: Duration,
}

impl HealthVerifier {
    pub fn new(probe: Arc<dyn SiteProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Any 2xx/3xx is success. Returns 0 after `tries` failed attempts.
    pub async fn probe(&self, url: &str, tries: u32) -> u16 {
        let policy = RetryPolicy::fixed(tries.max(1), self.interval);
        let attempts = policy.attempts();
        for attempt in 0..attempts {
            match self.probe.head(url).await {
                Ok(code) if (200..400).contains(&code) => return code,
                Ok(code) => tracing::debug!(url, code, attempt, "HEAD probe not healthy"),
                Err(e) => tracing::debug!(url, attempt, error = %e, "HEAD probe failed"),
            }
            if attempt + 1 < attempts {
                policy.pause(attempt).await;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProvisionError, Result};
    use crate::marker::inject_marker;
    use crate::probe::{SiteEnvelope, SiteHtmlResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replays scripted answers, repeating the last one.
    struct Scripted {
        heads: Mutex<Vec<Result<u16>>>,
        pages: Mutex<Vec<SiteHtmlResponse>>,
    }

    impl Scripted {
        fn new(heads: Vec<Result<u16>>, pages: Vec<SiteHtmlResponse>) -> Arc<Self> {
            Arc::new(Self {
                heads: Mutex::new(heads),
                pages: Mutex::new(pages),
            })
        }
    }

    #[async_trait]
    impl SiteProbe for Scripted {
        async fn head(&self, _url: &str) -> Result<u16> {
            let mut heads = self.heads.lock();
            if heads.len() > 1 {
                return heads.remove(0);
            }
            match heads.first() {
                Some(Ok(c)) => Ok(*c),
                _ => Err(ProvisionError::Transient("connection refused".into())),
            }
        }

        async fn site_html(&self, _host: &str) -> Result<SiteHtmlResponse> {
            let mut pages = self.pages.lock();
            if pages.len() > 1 {
                return Ok(pages.remove(0));
            }
            pages
                .first()
                .cloned()
                .ok_or_else(|| ProvisionError::Transient("no answer".into()))
        }
    }

    fn page(status: u16, env: Option<SiteEnvelope>) -> SiteHtmlResponse {
        SiteHtmlResponse { status, envelope: env }
    }

    #[tokio::test]
    async fn source_check_waits_for_propagation() {
        let html = inject_marker("<html><head></head></html>", "acme-1234");
        let probe = Scripted::new(
            vec![],
            vec![
                page(404, None),
                page(200, Some(SiteEnvelope::tenant("acme-1234", &html))),
            ],
        );
        let checker = SourceChecker::new(probe, RetryPolicy::fixed(3, Duration::ZERO));
        let out = checker.check("acme-1234.preview.example.com", "acme-1234").await;
        assert_eq!(out, SourceCheck { code: 200, marker_ok: true });
        assert!(out.passed());
    }

    #[tokio::test]
    async fn unmarked_content_fails_without_retry() {
        let probe = Scripted::new(
            vec![],
            vec![page(200, Some(SiteEnvelope::tenant("acme-1234", "<html></html>")))],
        );
        let checker = SourceChecker::new(probe, RetryPolicy::fixed(3, Duration::ZERO));
        let out = checker.check("h", "acme-1234").await;
        assert_eq!(out.code, 200);
        assert!(!out.passed());
    }

    #[tokio::test]
    async fn foreign_tenant_is_not_accepted() {
        let html = inject_marker("<html><head></head></html>", "other-0001");
        let probe = Scripted::new(
            vec![],
            vec![page(200, Some(SiteEnvelope::tenant("other-0001", &html)))],
        );
        let checker = SourceChecker::new(probe, RetryPolicy::fixed(2, Duration::ZERO));
        let out = checker.check("h", "acme-1234").await;
        assert_eq!(out, SourceCheck { code: 200, marker_ok: false });
    }

    #[tokio::test]
    async fn health_accepts_redirects_and_reports_zero_on_exhaustion() {
        let probe = Scripted::new(vec![Ok(503), Ok(301)], vec![]);
        let verifier = HealthVerifier::new(probe, Duration::ZERO);
        assert_eq!(verifier.probe("https://x", 3).await, 301);

        let down = Scripted::new(vec![Ok(500)], vec![]);
        let verifier = HealthVerifier::new(down, Duration::ZERO);
        assert_eq!(verifier.probe("https://x", 2).await, 0);

        let refused = Scripted::new(vec![], vec![]);
        let verifier = HealthVerifier::new(refused, Duration::ZERO);
        assert_eq!(verifier.probe("https://x", 2).await, 0);
    }
}
