//! Tenant record store backed by SQLite.
//!
//! One row per lead, addressed by row index. Stage writes go through the
//! transition table and an optional compare-and-set guard, so overlapping
//! runner invocations cannot both advance the same record.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{ProvisionError, Result};
use crate::record::{
    NewTenant, RecordKey, RecordUpdate, StageFilter, TenantRecord, TenantRepository, append_note,
};
use crate::stage::Stage;

const COLUMNS: &str = "row_num, id, created_at, stage, business_name, category, region, goal,
                       slug, preview_url, prod_url, audit_note";

/// SQLite-backed [`TenantRepository`].
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                row_num INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                stage TEXT NOT NULL,
                business_name TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                goal TEXT NOT NULL DEFAULT '',
                slug TEXT,
                preview_url TEXT,
                prod_url TEXT,
                audit_note TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_tenants_stage ON tenants(stage);
            CREATE INDEX IF NOT EXISTS idx_tenants_slug ON tenants(slug COLLATE NOCASE);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn load(db: &Connection, row: usize) -> Result<Option<TenantRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM tenants WHERE row_num = ?1");
        let raw = db
            .query_row(&sql, params![row as i64], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }
}

/// Row as stored, before the stage text is parsed.
struct RawRow {
    row: i64,
    id: String,
    created_at: String,
    stage: String,
    business_name: String,
    category: String,
    region: String,
    goal: String,
    slug: Option<String>,
    preview_url: Option<String>,
    prod_url: Option<String>,
    audit_note: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row: row.get(0)?,
            id: row.get(1)?,
            created_at: row.get(2)?,
            stage: row.get(3)?,
            business_name: row.get(4)?,
            category: row.get(5)?,
            region: row.get(6)?,
            goal: row.get(7)?,
            slug: row.get(8)?,
            preview_url: row.get(9)?,
            prod_url: row.get(10)?,
            audit_note: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<TenantRecord> {
        let stage = self
            .stage
            .parse::<Stage>()
            .map_err(|e| ProvisionError::Store(format!("row {}: {e}", self.row)))?;
        Ok(TenantRecord {
            row: self.row as usize,
            id: self.id,
            created_at: self.created_at,
            stage,
            business_name: self.business_name,
            category: self.category,
            region: self.region,
            goal: self.goal,
            slug: self.slug.filter(|s| !s.trim().is_empty()),
            preview_url: self.preview_url.filter(|s| !s.trim().is_empty()),
            prod_url: self.prod_url.filter(|s| !s.trim().is_empty()),
            audit_note: self.audit_note,
        })
    }
}

#[async_trait]
impl TenantRepository for SqliteStore {
    async fn scan(&self, filter: &StageFilter) -> Result<Vec<TenantRecord>> {
        let db = self.db.lock();
        let sql = format!("SELECT {COLUMNS} FROM tenants ORDER BY row_num ASC");
        let mut stmt = db.prepare(&sql)?;
        let raws = stmt
            .query_map([], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            match raw.into_record() {
                Ok(rec) if filter.matches(rec.stage) => out.push(rec),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable tenant row"),
            }
        }
        Ok(out)
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<TenantRecord>> {
        let db = self.db.lock();
        let (sql, value) = match key {
            RecordKey::Id(id) => (
                format!("SELECT {COLUMNS} FROM tenants WHERE id = ?1 LIMIT 1"),
                id.trim().to_string(),
            ),
            RecordKey::Slug(slug) => (
                format!(
                    "SELECT {COLUMNS} FROM tenants WHERE lower(trim(slug)) = ?1
                     ORDER BY row_num ASC LIMIT 1"
                ),
                slug.trim().to_lowercase(),
            ),
        };
        let raw = db
            .query_row(&sql, params![value], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    async fn update(&self, row: usize, update: RecordUpdate) -> Result<TenantRecord> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let current = Self::load(&tx, row)?
            .ok_or_else(|| ProvisionError::NotFound(format!("tenant row {row}")))?;

        if let Some(expected) = update.expect_stage
            && current.stage != expected
        {
            return Err(ProvisionError::StageConflict {
                id: current.id,
                expected,
                actual: current.stage,
            });
        }
        if let Some(next) = update.stage
            && !current.stage.can_transition(next)
        {
            return Err(ProvisionError::Validation(format!(
                "record {} cannot move from {} to {next}",
                current.id, current.stage
            )));
        }

        let note = match &update.note {
            Some(entry) => append_note(&current.audit_note, entry),
            None => current.audit_note.clone(),
        };

        tx.execute(
            "UPDATE tenants SET
                stage = COALESCE(?2, stage),
                slug = COALESCE(?3, slug),
                preview_url = COALESCE(?4, preview_url),
                prod_url = COALESCE(?5, prod_url),
                audit_note = ?6
             WHERE row_num = ?1",
            params![
                row as i64,
                update.stage.map(|s| s.as_str()),
                update.slug,
                update.preview_url,
                update.prod_url,
                note,
            ],
        )?;

        let updated = Self::load(&tx, row)?
            .ok_or_else(|| ProvisionError::NotFound(format!("tenant row {row}")))?;
        tx.commit()?;
        Ok(updated)
    }

    async fn insert(&self, tenant: NewTenant) -> Result<TenantRecord> {
        if tenant.id.trim().is_empty() {
            return Err(ProvisionError::Validation("tenant id is required".into()));
        }
        let db = self.db.lock();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO tenants (id, created_at, stage, business_name, category, region, goal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tenant.id.trim(),
                now,
                Stage::New.as_str(),
                tenant.business_name,
                tenant.category,
                tenant.region,
                tenant.goal,
            ],
        )?;
        let row = db.last_insert_rowid() as usize;
        Self::load(&db, row)?
            .ok_or_else(|| ProvisionError::Store(format!("inserted row {row} vanished")))
    }
}
