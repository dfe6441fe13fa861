//! Plugin Schema Migrations
//!
//! Executes a plugin's SQL migration files against its own schema-context
//! database and appends an audit record per run. Migration files live under
//! `<plugin_dir>/migrations/` and pair up as `NNN_name.up.sql` /
//! `NNN_name.down.sql`; activation runs the up scripts in ascending order,
//! uninstall runs the down scripts in descending order.
//!
//! Each schema context maps to its own SQLite file under the data directory,
//! so one plugin's botched migration cannot corrupt another plugin's tables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::store::{MigrationDirection, PluginStore, StoreError};

/// Migration errors
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Migration directory or script could not be read
    #[error("migration io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A script failed to execute; `step` names the failing file
    #[error("migration '{step}' failed: {message}")]
    Execution { step: String, message: String },

    /// Audit persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One discovered migration step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// Numeric prefix, used for ordering
    pub sequence: u32,

    /// File stem without the direction suffix, e.g. `001_init`
    pub name: String,

    /// Full path to the SQL script
    pub path: PathBuf,
}

/// Outcome of running one plugin's migrations in one direction
#[derive(Debug)]
pub struct MigrationRun {
    /// Steps that executed successfully, in execution order
    pub applied: Vec<String>,

    /// Audit record id for this run
    pub audit_id: i64,
}

/// Runs plugin migrations and records every run in the audit log.
pub struct MigrationRunner {
    data_dir: PathBuf,
    store: Arc<PluginStore>,
}

impl MigrationRunner {
    pub fn new(data_dir: impl Into<PathBuf>, store: Arc<PluginStore>) -> Self {
        Self {
            data_dir: data_dir.into(),
            store,
        }
    }

    /// Path of the SQLite file backing one schema context.
    pub fn context_db_path(&self, schema_context: &str) -> PathBuf {
        self.data_dir.join(format!("{schema_context}.db"))
    }

    /// List a plugin's migration steps for one direction, in execution
    /// order (ascending for up, descending for down). A plugin with no
    /// `migrations/` directory has zero steps.
    pub fn steps(
        &self,
        plugin_dir: &Path,
        direction: MigrationDirection,
    ) -> Result<Vec<MigrationStep>, MigrateError> {
        let migrations_dir = plugin_dir.join("migrations");
        if !migrations_dir.is_dir() {
            return Ok(Vec::new());
        }

        let suffix = match direction {
            MigrationDirection::Up => ".up.sql",
            MigrationDirection::Down => ".down.sql",
        };

        let entries = std::fs::read_dir(&migrations_dir).map_err(|source| MigrateError::Io {
            path: migrations_dir.clone(),
            source,
        })?;

        let mut steps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrateError::Io {
                path: migrations_dir.clone(),
                source,
            })?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(suffix) else {
                continue;
            };

            // Files without a numeric prefix are skipped, not fatal
            let Some(sequence) = stem
                .split('_')
                .next()
                .and_then(|prefix| prefix.parse::<u32>().ok())
            else {
                tracing::warn!(file = %file_name, "Skipping migration without numeric prefix");
                continue;
            };

            steps.push(MigrationStep {
                sequence,
                name: stem.to_string(),
                path,
            });
        }

        steps.sort_by(|a, b| (a.sequence, &a.name).cmp(&(b.sequence, &b.name)));
        if direction == MigrationDirection::Down {
            steps.reverse();
        }
        Ok(steps)
    }

    /// Run one plugin's migrations in `direction` against its schema-context
    /// database, stopping at the first failing script.
    ///
    /// Exactly one audit record is appended per call, success or failure.
    /// On failure the error carries the failing step; steps that already ran
    /// are not rolled back.
    pub fn run(
        &self,
        slug: &str,
        schema_context: &str,
        plugin_dir: &Path,
        direction: MigrationDirection,
    ) -> Result<MigrationRun, MigrateError> {
        let steps = self.steps(plugin_dir, direction)?;
        if steps.is_empty() {
            let audit_id = self.store.add_migration_audit(
                slug,
                schema_context,
                direction,
                true,
                None,
                "no migration scripts",
                "",
            )?;
            return Ok(MigrationRun {
                applied: Vec::new(),
                audit_id,
            });
        }

        std::fs::create_dir_all(&self.data_dir).map_err(|source| MigrateError::Io {
            path: self.data_dir.clone(),
            source,
        })?;
        let db_path = self.context_db_path(schema_context);

        let mut applied: Vec<String> = Vec::new();
        let mut stdout_lines: Vec<String> = Vec::new();

        let failure = self.execute_steps(&db_path, &steps, &mut applied, &mut stdout_lines);

        let stdout = stdout_lines.join("\n");
        match failure {
            None => {
                let audit_id = self.store.add_migration_audit(
                    slug,
                    schema_context,
                    direction,
                    true,
                    None,
                    &stdout,
                    "",
                )?;
                tracing::info!(
                    slug = %slug,
                    context = %schema_context,
                    direction = %direction.as_str(),
                    steps = applied.len(),
                    "Migrations applied"
                );
                Ok(MigrationRun { applied, audit_id })
            }
            Some((step, message)) => {
                self.store.add_migration_audit(
                    slug,
                    schema_context,
                    direction,
                    false,
                    Some(&message),
                    &stdout,
                    &message,
                )?;
                tracing::error!(
                    slug = %slug,
                    context = %schema_context,
                    step = %step,
                    error = %message,
                    "Migration failed"
                );
                Err(MigrateError::Execution { step, message })
            }
        }
    }

    /// Execute steps in order, returning the first failure as
    /// `(step_name, message)`.
    fn execute_steps(
        &self,
        db_path: &Path,
        steps: &[MigrationStep],
        applied: &mut Vec<String>,
        stdout_lines: &mut Vec<String>,
    ) -> Option<(String, String)> {
        let conn = match rusqlite::Connection::open(db_path) {
            Ok(conn) => conn,
            Err(err) => {
                return Some(("open".to_string(), err.to_string()));
            }
        };

        for step in steps {
            let sql = match std::fs::read_to_string(&step.path) {
                Ok(sql) => sql,
                Err(err) => {
                    return Some((step.name.clone(), format!("read failed: {err}")));
                }
            };

            if let Err(err) = conn.execute_batch(&sql) {
                return Some((step.name.clone(), err.to_string()));
            }

            stdout_lines.push(format!("applied {}", step.name));
            applied.push(step.name.clone());
        }
        None
    }
}
