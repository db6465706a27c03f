//! Tenant records and the repository seam every runner writes through.

use async_trait::async_trait;

use crate::error::Result;
use crate::stage::Stage;

/// Separator between audit note entries.
pub const NOTE_SEPARATOR: &str = " | ";

/// One tenant row in the record store.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantRecord {
    /// Row index in the store. Stable for the lifetime of the row.
    pub row: usize,
    pub id: String,
    pub created_at: String,
    pub stage: Stage,
    pub business_name: String,
    pub category: String,
    pub region: String,
    pub goal: String,
    pub slug: Option<String>,
    pub preview_url: Option<String>,
    pub prod_url: Option<String>,
    pub audit_note: String,
}

impl TenantRecord {
    /// Slug if set and non-empty.
    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Fields for a new lead.
#[derive(Debug, Clone, Default)]
pub struct NewTenant {
    pub id: String,
    pub business_name: String,
    pub category: String,
    pub region: String,
    pub goal: String,
}

/// A targeted write to one row. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub stage: Option<Stage>,
    /// Compare-and-set guard: the write is rejected unless the row is still
    /// at this stage.
    pub expect_stage: Option<Stage>,
    pub slug: Option<String>,
    pub preview_url: Option<String>,
    pub prod_url: Option<String>,
    /// Appended to the audit note with [`NOTE_SEPARATOR`].
    pub note: Option<String>,
}

impl RecordUpdate {
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn expecting(mut self, stage: Stage) -> Self {
        self.expect_stage = Some(stage);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_preview_url(mut self, url: impl Into<String>) -> Self {
        self.preview_url = Some(url.into());
        self
    }

    pub fn with_prod_url(mut self, url: impl Into<String>) -> Self {
        self.prod_url = Some(url.into());
        self
    }
}

/// Append `entry` to an existing note.
pub fn append_note(current: &str, entry: &str) -> String {
    match (current.trim().is_empty(), entry.trim().is_empty()) {
        (true, _) => entry.to_string(),
        (false, true) => current.to_string(),
        (false, false) => format!("{current}{NOTE_SEPARATOR}{entry}"),
    }
}

/// Request id in the `<prefix><base36 millis>_<4 random base36>` convention.
pub fn new_request_id(prefix: &str) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let tail: String = (0..4)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{prefix}{}_{tail}", crate::slug::to_base36(millis))
}

/// Which records a scan returns.
#[derive(Debug, Clone, Default)]
pub enum StageFilter {
    #[default]
    All,
    Any(Vec<Stage>),
}

impl StageFilter {
    pub fn any(stages: &[Stage]) -> Self {
        StageFilter::Any(stages.to_vec())
    }

    pub fn matches(&self, stage: Stage) -> bool {
        match self {
            StageFilter::All => true,
            StageFilter::Any(stages) => stages.contains(&stage),
        }
    }
}

/// Lookup key for a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Id(String),
    Slug(String),
}

/// Record store used by the runners and the promotion orchestrator.
///
/// Writes are targeted row updates; a stage change is validated against
/// [`Stage::can_transition`] and the optional compare-and-set guard.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Full scan, in row order, filtered by stage.
    async fn scan(&self, filter: &StageFilter) -> Result<Vec<TenantRecord>>;

    async fn get(&self, key: &RecordKey) -> Result<Option<TenantRecord>>;

    async fn update(&self, row: usize, update: RecordUpdate) -> Result<TenantRecord>;

    async fn insert(&self, tenant: NewTenant) -> Result<TenantRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_note_joins_with_separator() {
        assert_eq!(append_note("", "dns:created"), "dns:created");
        assert_eq!(append_note("dns:created", ""), "dns:created");
        assert_eq!(append_note("a", "b"), "a | b");
    }

    #[test]
    fn request_ids_follow_convention() {
        let id = new_request_id("rwz_");
        assert!(id.starts_with("rwz_"));
        let tail = id.rsplit('_').next().unwrap();
        assert_eq!(tail.len(), 4);
        assert_ne!(new_request_id("rwz_"), new_request_id("rwz_"));
    }

    #[test]
    fn filter_matching() {
        let f = StageFilter::any(&[Stage::New, Stage::DnsError]);
        assert!(f.matches(Stage::New));
        assert!(!f.matches(Stage::Live));
        assert!(StageFilter::All.matches(Stage::Live));
    }
}
