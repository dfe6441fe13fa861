//! Plugin Persistence
//!
//! SQLite-backed store holding one row per discovered plugin (identity,
//! activation flag, error-tracking sub-state) plus the append-only migration
//! audit log. The store is the only shared mutable resource across
//! management operations; activation toggles are compare-and-set so two
//! concurrent requests cannot double-load a plugin.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::manifest::PluginManifest;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Data directory could not be created or opened
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// No row for the given slug
    #[error("plugin '{0}' not found")]
    NotFound(String),
}

/// Persisted state of one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub icon: Option<String>,
    pub category: Option<String>,
    pub priority: i64,
    pub is_active: bool,
    /// Set when repeated load failures crossed the threshold; suppresses
    /// future load attempts until explicitly reset
    pub is_broken: bool,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_loaded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Direction of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    Up,
    Down,
}

impl MigrationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

/// One append-only audit record for a migration run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationAuditRecord {
    pub id: i64,
    pub plugin_slug: String,
    pub schema_context: String,
    pub direction: String,
    pub status: String,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub ran_at: i64,
}

/// Aggregate migration counters
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Plugin store over a single SQLite connection
pub struct PluginStore {
    conn: Arc<Mutex<Connection>>,
}

impl PluginStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS plugins (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                icon TEXT,
                category TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_broken INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_loaded_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS migration_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plugin_slug TEXT NOT NULL,
                schema_context TEXT NOT NULL,
                direction TEXT NOT NULL CHECK(direction IN ('up', 'down')),
                status TEXT NOT NULL CHECK(status IN ('success', 'failure')),
                error TEXT,
                stdout TEXT NOT NULL DEFAULT '',
                stderr TEXT NOT NULL DEFAULT '',
                ran_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_migration_audit_slug
                ON migration_audit(plugin_slug);
            "#,
        )?;
        Ok(())
    }

    /// Reconcile the store against a discovery pass: create rows for newly
    /// discovered plugins (inactive) and refresh identity fields for known
    /// ones. Never touches activation or error-tracking state.
    pub fn reconcile(&self, manifests: &[PluginManifest]) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let ts = now();

        for m in manifests {
            let inserted = conn.execute(
                r#"INSERT OR IGNORE INTO plugins
                   (slug, name, description, version, author, icon, category, priority,
                    created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"#,
                params![
                    m.slug,
                    m.name,
                    m.description,
                    m.version.to_string(),
                    m.author,
                    m.icon,
                    m.category,
                    m.priority,
                    ts,
                ],
            )?;

            if inserted == 0 {
                conn.execute(
                    r#"UPDATE plugins
                       SET name = ?2, description = ?3, version = ?4, author = ?5,
                           icon = ?6, category = ?7, priority = ?8, updated_at = ?9
                       WHERE slug = ?1"#,
                    params![
                        m.slug,
                        m.name,
                        m.description,
                        m.version.to_string(),
                        m.author,
                        m.icon,
                        m.category,
                        m.priority,
                        ts,
                    ],
                )?;
            } else {
                tracing::info!(slug = %m.slug, "Seeded plugin record");
            }
        }
        Ok(())
    }

    /// All plugin records ordered by (priority, slug).
    pub fn list(&self) -> Result<Vec<PluginRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT slug, name, description, version, author, icon, category, priority,
                    is_active, is_broken, error_count, last_error, last_loaded_at,
                    created_at, updated_at
             FROM plugins ORDER BY priority ASC, slug ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One plugin record by slug.
    pub fn get(&self, slug: &str) -> Result<Option<PluginRecord>, StoreError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT slug, name, description, version, author, icon, category, priority,
                        is_active, is_broken, error_count, last_error, last_loaded_at,
                        created_at, updated_at
                 FROM plugins WHERE slug = ?1",
                params![slug],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Compare-and-set the activation flag.
    ///
    /// Returns `Ok(true)` only when the flag actually flipped, giving the
    /// caller at-most-once semantics per transition; `Ok(false)` means the
    /// plugin was already in the requested state.
    pub fn set_active(&self, slug: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE plugins SET is_active = ?2, updated_at = ?3
             WHERE slug = ?1 AND is_active = ?4",
            params![slug, active, now(), !active],
        )?;

        if changed == 0 {
            // Distinguish "already in state" from "no such plugin"
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM plugins WHERE slug = ?1",
                    params![slug],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Err(StoreError::NotFound(slug.to_string()));
            }
        }
        Ok(changed > 0)
    }

    /// Record a successful load: resets the error counter and stamps
    /// `last_loaded_at`.
    pub fn record_load_success(&self, slug: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let ts = now();
        let changed = conn.execute(
            "UPDATE plugins
             SET error_count = 0, last_error = NULL, last_loaded_at = ?2, updated_at = ?2
             WHERE slug = ?1",
            params![slug, ts],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(slug.to_string()));
        }
        Ok(())
    }

    /// Record a failed load attempt. When the running error count reaches
    /// `threshold` the plugin is marked broken; returns whether it is broken
    /// after this failure.
    pub fn record_load_failure(
        &self,
        slug: &str,
        error: &str,
        threshold: u32,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let ts = now();
        let changed = conn.execute(
            "UPDATE plugins
             SET error_count = error_count + 1, last_error = ?2, updated_at = ?3
             WHERE slug = ?1",
            params![slug, error, ts],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(slug.to_string()));
        }

        conn.execute(
            "UPDATE plugins SET is_broken = 1, updated_at = ?3
             WHERE slug = ?1 AND error_count >= ?2",
            params![slug, threshold, ts],
        )?;

        let broken: bool = conn.query_row(
            "SELECT is_broken FROM plugins WHERE slug = ?1",
            params![slug],
            |row| row.get(0),
        )?;
        Ok(broken)
    }

    /// Surface a hook-callback failure on the owning plugin's record.
    pub fn record_hook_failure(&self, slug: &str, error: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE plugins
             SET error_count = error_count + 1, last_error = ?2, updated_at = ?3
             WHERE slug = ?1",
            params![slug, error, now()],
        )?;
        Ok(())
    }

    /// Operator reset: clears the broken flag and the error sub-state.
    pub fn reset_broken(&self, slug: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE plugins
             SET is_broken = 0, error_count = 0, last_error = NULL, updated_at = ?2
             WHERE slug = ?1",
            params![slug, now()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(slug.to_string()));
        }
        Ok(())
    }

    /// Delete a plugin's record (uninstall).
    pub fn delete(&self, slug: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM plugins WHERE slug = ?1", params![slug])?;
        if changed == 0 {
            return Err(StoreError::NotFound(slug.to_string()));
        }
        Ok(())
    }

    /// Append a migration audit record. Records are never mutated.
    pub fn add_migration_audit(
        &self,
        plugin_slug: &str,
        schema_context: &str,
        direction: MigrationDirection,
        success: bool,
        error: Option<&str>,
        stdout: &str,
        stderr: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO migration_audit
             (plugin_slug, schema_context, direction, status, error, stdout, stderr, ran_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                plugin_slug,
                schema_context,
                direction.as_str(),
                if success { "success" } else { "failure" },
                error,
                stdout,
                stderr,
                now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Migration history, newest first, optionally filtered to one plugin.
    pub fn migration_history(
        &self,
        slug: Option<&str>,
    ) -> Result<Vec<MigrationAuditRecord>, StoreError> {
        let conn = self.conn.lock();
        let base = "SELECT id, plugin_slug, schema_context, direction, status, error,
                           stdout, stderr, ran_at
                    FROM migration_audit";

        let rows = match slug {
            Some(slug) => {
                let mut stmt = conn
                    .prepare(&format!("{base} WHERE plugin_slug = ?1 ORDER BY id DESC"))?;
                stmt.query_map(params![slug], row_to_audit)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!("{base} ORDER BY id DESC"))?;
                stmt.query_map([], row_to_audit)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// One audit record by id.
    pub fn migration_record(&self, id: i64) -> Result<Option<MigrationAuditRecord>, StoreError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT id, plugin_slug, schema_context, direction, status, error,
                        stdout, stderr, ran_at
                 FROM migration_audit WHERE id = ?1",
                params![id],
                row_to_audit,
            )
            .optional()?;
        Ok(record)
    }

    /// Aggregate migration counters.
    pub fn migration_stats(&self) -> Result<MigrationStats, StoreError> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'success'), 0),
                    COALESCE(SUM(status = 'failure'), 0)
             FROM migration_audit",
            [],
            |row| {
                Ok(MigrationStats {
                    total: row.get(0)?,
                    succeeded: row.get(1)?,
                    failed: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PluginRecord> {
    Ok(PluginRecord {
        slug: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        version: row.get(3)?,
        author: row.get(4)?,
        icon: row.get(5)?,
        category: row.get(6)?,
        priority: row.get(7)?,
        is_active: row.get(8)?,
        is_broken: row.get(9)?,
        error_count: row.get(10)?,
        last_error: row.get(11)?,
        last_loaded_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<MigrationAuditRecord> {
    Ok(MigrationAuditRecord {
        id: row.get(0)?,
        plugin_slug: row.get(1)?,
        schema_context: row.get(2)?,
        direction: row.get(3)?,
        status: row.get(4)?,
        error: row.get(5)?,
        stdout: row.get(6)?,
        stderr: row.get(7)?,
        ran_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(slug: &str, priority: i64) -> PluginManifest {
        PluginManifest {
            slug: slug.to_string(),
            name: slug.to_string(),
            description: String::new(),
            entry: "index".to_string(),
            version: semver::Version::new(1, 0, 0),
            author: String::new(),
            icon: None,
            category: None,
            priority,
            client: None,
            schema: None,
        }
    }

    #[test]
    fn test_reconcile_seeds_inactive_rows() {
        let store = PluginStore::in_memory().unwrap();
        store
            .reconcile(&[manifest("chat-plugin", 10), manifest("admin-plugin", 1)])
            .unwrap();

        let records = store.list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].slug, "admin-plugin");
        assert_eq!(records[1].slug, "chat-plugin");
        assert!(records.iter().all(|r| !r.is_active && !r.is_broken));
    }

    #[test]
    fn test_reconcile_preserves_activation_state() {
        let store = PluginStore::in_memory().unwrap();
        store.reconcile(&[manifest("p", 0)]).unwrap();
        store.set_active("p", true).unwrap();

        let mut updated = manifest("p", 5);
        updated.version = semver::Version::new(2, 0, 0);
        store.reconcile(&[updated]).unwrap();

        let record = store.get("p").unwrap().unwrap();
        assert!(record.is_active);
        assert_eq!(record.version, "2.0.0");
        assert_eq!(record.priority, 5);
    }

    #[test]
    fn test_set_active_is_compare_and_set() {
        let store = PluginStore::in_memory().unwrap();
        store.reconcile(&[manifest("p", 0)]).unwrap();

        assert!(store.set_active("p", true).unwrap());
        assert!(!store.set_active("p", true).unwrap());
        assert!(store.set_active("p", false).unwrap());

        let err = store.set_active("ghost", true).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_load_failure_threshold_marks_broken() {
        let store = PluginStore::in_memory().unwrap();
        store.reconcile(&[manifest("flaky", 0)]).unwrap();

        assert!(!store.record_load_failure("flaky", "boom 1", 3).unwrap());
        assert!(!store.record_load_failure("flaky", "boom 2", 3).unwrap());
        assert!(store.record_load_failure("flaky", "boom 3", 3).unwrap());

        let record = store.get("flaky").unwrap().unwrap();
        assert!(record.is_broken);
        assert_eq!(record.error_count, 3);
        assert_eq!(record.last_error.as_deref(), Some("boom 3"));
    }

    #[test]
    fn test_load_success_resets_error_state() {
        let store = PluginStore::in_memory().unwrap();
        store.reconcile(&[manifest("p", 0)]).unwrap();
        store.record_load_failure("p", "transient", 5).unwrap();

        store.record_load_success("p").unwrap();
        let record = store.get("p").unwrap().unwrap();
        assert_eq!(record.error_count, 0);
        assert_eq!(record.last_error, None);
        assert!(record.last_loaded_at.is_some());
    }

    #[test]
    fn test_reset_broken_clears_error_substate() {
        let store = PluginStore::in_memory().unwrap();
        store.reconcile(&[manifest("p", 0)]).unwrap();
        store.record_load_failure("p", "boom", 1).unwrap();
        assert!(store.get("p").unwrap().unwrap().is_broken);

        store.reset_broken("p").unwrap();
        let record = store.get("p").unwrap().unwrap();
        assert!(!record.is_broken);
        assert_eq!(record.error_count, 0);
    }

    #[test]
    fn test_migration_audit_append_and_stats() {
        let store = PluginStore::in_memory().unwrap();
        store
            .add_migration_audit(
                "p",
                "p_schema",
                MigrationDirection::Up,
                true,
                None,
                "applied 001_init",
                "",
            )
            .unwrap();
        let id = store
            .add_migration_audit(
                "p",
                "p_schema",
                MigrationDirection::Down,
                false,
                Some("syntax error"),
                "",
                "syntax error near DROP",
            )
            .unwrap();

        let history = store.migration_history(Some("p")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, id); // newest first
        assert_eq!(history[0].status, "failure");

        let record = store.migration_record(id).unwrap().unwrap();
        assert_eq!(record.direction, "down");
        assert_eq!(record.stderr, "syntax error near DROP");

        let stats = store.migration_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
    }
}
