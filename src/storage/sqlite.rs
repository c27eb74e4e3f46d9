//! `SQLite` storage façade.
//!
//! The sync engine depends on a narrow set of operations: issue reads,
//! dirty-set bookkeeping, the metadata and export-hash tables, and the
//! transactional import primitive. The façade is safe to call from
//! multiple threads (`&self` methods over an internal mutex) and closable:
//! once [`Storage::close`] runs, every operation fails fast with
//! [`BraidError::StoreClosed`] so a flush racing a shutdown degrades to a
//! no-op.

use crate::error::{BraidError, Result};
use crate::model::{Dependency, DependencyKind, Issue, IssueType, Priority, Status};
use crate::storage::schema::apply_schema;
use crate::util::{allocate_id, identity_fingerprint, max_numeric_suffix, prefix_of};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

/// Options for [`Storage::import_issues_core`].
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Skip cross-prefix validation. Auto-import sets this because it must
    /// accept whatever the user pulled.
    pub skip_prefix_validation: bool,
    /// Expected id prefix when validation is enabled.
    pub expected_prefix: Option<String>,
}

/// Result of the transactional import primitive.
#[derive(Debug, Clone, Default)]
pub struct ImportCoreResult {
    /// Issues inserted under their incoming id.
    pub created: usize,
    /// Existing issues overwritten by a newer incoming record.
    pub updated: usize,
    /// Issues left untouched (older, equal, tombstone-protected, or wisps).
    pub skipped: usize,
    /// Collided ids, old -> freshly allocated.
    pub id_mapping: HashMap<String, String>,
}

impl ImportCoreResult {
    /// True if the import changed nothing in the database.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created + self.updated + self.id_mapping.len() == 0
    }
}

enum StorageState {
    Open(Connection),
    Closed,
}

/// SQLite-backed storage façade.
#[derive(Debug)]
pub struct Storage {
    state: Mutex<StorageState>,
}

impl std::fmt::Debug for StorageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(_) => f.write_str("Open"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

impl Storage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Some(30_000))
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self {
            state: Mutex::new(StorageState::Open(conn)),
        })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            state: Mutex::new(StorageState::Open(conn)),
        })
    }

    /// Close the façade. Subsequent operations fail fast with
    /// [`BraidError::StoreClosed`]. Idempotent.
    pub fn close(&self) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = StorageState::Closed;
        }
    }

    /// Liveness flag: false once [`Storage::close`] has run.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|guard| matches!(*guard, StorageState::Open(_)))
            .unwrap_or(false)
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self.state.lock().map_err(|_| BraidError::StoreClosed)?;
        match &*guard {
            StorageState::Open(conn) => f(conn),
            StorageState::Closed => Err(BraidError::StoreClosed),
        }
    }

    fn with_conn_mut<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.state.lock().map_err(|_| BraidError::StoreClosed)?;
        match &mut *guard {
            StorageState::Open(conn) => f(conn),
            StorageState::Closed => Err(BraidError::StoreClosed),
        }
    }

    // =========================================================================
    // Issues
    // =========================================================================

    /// Create a new issue and mark it dirty, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue cannot be inserted (e.g. id collision).
    pub fn create_issue(&self, issue: &Issue) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if issue_exists(&tx, &issue.id)? {
                return Err(BraidError::validation(
                    "id",
                    format!("issue already exists: {}", issue.id),
                ));
            }
            write_issue(&tx, issue)?;
            mark_dirty_tx(&tx, &issue.id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Overwrite an existing issue and mark it dirty, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the id is unknown.
    pub fn put_issue(&self, issue: &Issue) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if !issue_exists(&tx, &issue.id)? {
                return Err(BraidError::IssueNotFound {
                    id: issue.id.clone(),
                });
            }
            write_issue(&tx, issue)?;
            mark_dirty_tx(&tx, &issue.id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Fetch a single issue with labels and dependencies populated.
    ///
    /// Never fails for a missing id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        self.with_conn(|conn| {
            let Some(mut issue) = read_issue_row(conn, id)? else {
                return Ok(None);
            };
            issue.labels = read_labels(conn, id)?;
            issue.dependencies = read_dependencies(conn, id)?;
            Ok(Some(issue))
        })
    }

    /// All issues, id-sorted, with labels and dependencies populated.
    ///
    /// Includes wisps and tombstones; the exporter filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn all_issues(&self) -> Result<Vec<Issue>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id"
            ))?;
            let mut issues = stmt
                .query_map([], issue_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut labels = read_all_labels(conn)?;
            let mut deps = read_all_dependencies(conn)?;
            for issue in &mut issues {
                if let Some(l) = labels.remove(&issue.id) {
                    issue.labels = l;
                }
                if let Some(d) = deps.remove(&issue.id) {
                    issue.dependencies = d;
                }
            }
            Ok(issues)
        })
    }

    /// Issues filtered by status (or all, id-sorted).
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn list_issues(&self, status: Option<Status>) -> Result<Vec<Issue>> {
        let mut issues = self.all_issues()?;
        if let Some(status) = status {
            issues.retain(|issue| issue.status == status);
        } else {
            issues.retain(|issue| issue.status != Status::Tombstone && !issue.ephemeral);
        }
        Ok(issues)
    }

    /// All issue ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM issues ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Count all issues (including wisps and tombstones).
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn count_issues(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT count(*) FROM issues", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
    }

    /// Outgoing dependency edges for an issue, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn dependency_records(&self, id: &str) -> Result<Vec<Dependency>> {
        self.with_conn(|conn| read_dependencies(conn, id))
            .map_err(|e| match e {
                BraidError::StoreClosed => BraidError::StoreClosed,
                other => BraidError::context(format!("get dependencies for {id}"), other),
            })
    }

    /// Add a dependency edge and mark the source dirty.
    ///
    /// Targets prefixed `external:` are stored verbatim; local targets are
    /// not required to exist (dangling edges surface in doctor output).
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the source issue is unknown.
    pub fn add_dependency(&self, dep: &Dependency) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if !issue_exists(&tx, &dep.issue_id)? {
                return Err(BraidError::IssueNotFound {
                    id: dep.issue_id.clone(),
                });
            }
            let next_seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM dependencies WHERE issue_id = ?",
                [&dep.issue_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO dependencies (issue_id, target_id, kind, seq)
                 VALUES (?, ?, ?, ?)",
                params![dep.issue_id, dep.target_id, dep.kind.as_str(), next_seq],
            )?;
            mark_dirty_tx(&tx, &dep.issue_id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Attach a label and mark the issue dirty. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is unknown.
    pub fn add_label(&self, issue_id: &str, label: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if !issue_exists(&tx, issue_id)? {
                return Err(BraidError::IssueNotFound {
                    id: issue_id.to_string(),
                });
            }
            tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                params![issue_id, label],
            )?;
            mark_dirty_tx(&tx, issue_id)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Hard-delete an issue row (plus labels, dependencies, export hash)
    /// and mark the id dirty so the next export drops its line.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn delete_issue(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM dependencies WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM labels WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM export_hashes WHERE issue_id = ?", [id])?;
            let removed = tx.execute("DELETE FROM issues WHERE id = ?", [id])?;
            mark_dirty_tx(&tx, id)?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    // =========================================================================
    // Dirty set
    // =========================================================================

    /// Mark an issue as awaiting export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn mark_dirty(&self, issue_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                params![issue_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Ids awaiting export. Order is not significant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn dirty_issue_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Clear dirty flags for exactly the given ids.
    ///
    /// The exporter passes only the ids it actually wrote; ids dirtied
    /// while a flush was running stay dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn clear_dirty_issues(&self, issue_ids: &[String]) -> Result<usize> {
        if issue_ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<&str> = issue_ids.iter().map(|_| "?").collect();
            let sql = format!(
                "DELETE FROM dirty_issues WHERE issue_id IN ({})",
                placeholders.join(",")
            );
            let params_vec: Vec<&dyn rusqlite::ToSql> = issue_ids
                .iter()
                .map(|s| s as &dyn rusqlite::ToSql)
                .collect();
            let count = conn.execute(&sql, params_vec.as_slice())?;
            Ok(count)
        })
    }

    // =========================================================================
    // Export hashes (for incremental export)
    // =========================================================================

    /// Stored line hash for an issue, if it has been exported.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn export_hash(&self, issue_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let hash = conn
                .query_row(
                    "SELECT line_hash FROM export_hashes WHERE issue_id = ?",
                    [issue_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hash)
        })
    }

    /// Batch record line hashes after a successful export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_export_hashes(&self, hashes: &[(String, String)]) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let mut stmt = conn.prepare(
                "INSERT OR REPLACE INTO export_hashes (issue_id, line_hash, exported_at)
                 VALUES (?, ?, ?)",
            )?;
            let mut count = 0;
            for (issue_id, line_hash) in hashes {
                stmt.execute(params![issue_id, line_hash, now])?;
                count += 1;
            }
            Ok(count)
        })
    }

    /// Drop every per-issue export hash.
    ///
    /// Called before every import and whenever the file-hash check fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn clear_all_export_hashes(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count = conn.execute("DELETE FROM export_hashes", [])?;
            Ok(count)
        })
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Get a metadata value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                [key, value],
            )?;
            Ok(())
        })
    }

    /// Delete a metadata key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn delete_metadata(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count = conn.execute("DELETE FROM metadata WHERE key = ?", [key])?;
            Ok(count > 0)
        })
    }

    // =========================================================================
    // Import primitive
    // =========================================================================

    /// Transactional upsert of a parsed issue batch.
    ///
    /// Collision handling: an incoming id that refers to an existing issue
    /// with a different identity fingerprint is re-identified with the
    /// smallest free numeric id in its prefix; every reference to the old
    /// id within the batch is rewritten before insertion. Same-identity
    /// records follow last-write-wins on `updated_at`, with tombstones
    /// protected from resurrection. Created, updated, and remapped ids are
    /// marked dirty so the follow-up export writes canonical lines.
    ///
    /// # Errors
    ///
    /// Returns an error on prefix mismatch (when validation is enabled) or
    /// database failure. The transaction rolls back on error.
    #[allow(clippy::too_many_lines)]
    pub fn import_issues_core(
        &self,
        mut issues: Vec<Issue>,
        options: &ImportOptions,
    ) -> Result<ImportCoreResult> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut result = ImportCoreResult::default();

            if !options.skip_prefix_validation {
                if let Some(prefix) = options.expected_prefix.as_deref() {
                    for issue in &issues {
                        if !issue.ephemeral && prefix_of(&issue.id) != prefix {
                            return Err(BraidError::Config(format!(
                                "Prefix mismatch: expected '{prefix}', found '{}'",
                                issue.id
                            )));
                        }
                    }
                }
            }

            // Phase 1: resolve ids against stored fingerprints.
            let mut existing: HashMap<String, String> = {
                let mut stmt = tx.prepare("SELECT id, fingerprint FROM issues")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
                rows.into_iter().collect()
            };
            let batch_ids: HashSet<String> =
                issues.iter().map(|issue| issue.id.clone()).collect();

            for issue in &issues {
                if issue.ephemeral {
                    continue;
                }
                let Some(stored_fp) = existing.get(&issue.id) else {
                    continue;
                };
                if *stored_fp == identity_fingerprint(issue) {
                    continue;
                }

                // Same id, different creation intent: allocate a fresh id.
                let prefix = prefix_of(&issue.id).to_string();
                let start = max_numeric_suffix(
                    existing
                        .keys()
                        .map(String::as_str)
                        .chain(batch_ids.iter().map(String::as_str))
                        .chain(result.id_mapping.values().map(String::as_str)),
                    &prefix,
                ) + 1;
                let new_id = allocate_id(&prefix, start, |candidate| {
                    existing.contains_key(candidate)
                        || batch_ids.contains(candidate)
                        || result.id_mapping.values().any(|v| v == candidate)
                });
                tracing::info!(old_id = %issue.id, new_id = %new_id, "Import collision: remapping id");
                result.id_mapping.insert(issue.id.clone(), new_id);
            }

            // Phase 2: rewrite remapped ids and edges within the batch.
            if !result.id_mapping.is_empty() {
                for issue in &mut issues {
                    if let Some(new_id) = result.id_mapping.get(&issue.id) {
                        issue.id.clone_from(new_id);
                    }
                    for dep in &mut issue.dependencies {
                        if let Some(new_target) = result.id_mapping.get(&dep.target_id) {
                            dep.target_id.clone_from(new_target);
                        }
                        dep.issue_id.clone_from(&issue.id);
                    }
                }
            }

            // Phase 3: execute.
            for issue in &issues {
                if issue.ephemeral {
                    result.skipped += 1;
                    continue;
                }

                if existing.contains_key(&issue.id) {
                    // Same identity: last-write-wins with tombstone protection.
                    let (stored_status, stored_updated): (String, String) = tx.query_row(
                        "SELECT status, updated_at FROM issues WHERE id = ?",
                        [&issue.id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    let stored_updated = parse_utc(&stored_updated)
                        .map_err(|e| BraidError::context("parse stored updated_at", e))?;

                    if stored_status == Status::Tombstone.as_str()
                        && issue.status != Status::Tombstone
                    {
                        tracing::debug!(id = %issue.id, "Tombstone protection: skipping import");
                        result.skipped += 1;
                        continue;
                    }

                    match issue.updated_at.cmp(&stored_updated) {
                        std::cmp::Ordering::Greater => {
                            write_issue(&tx, issue)?;
                            mark_dirty_tx(&tx, &issue.id)?;
                            result.updated += 1;
                        }
                        std::cmp::Ordering::Equal => {
                            // In sync; nothing to do and nothing to report.
                        }
                        std::cmp::Ordering::Less => {
                            result.skipped += 1;
                        }
                    }
                } else {
                    let was_remapped = result.id_mapping.values().any(|v| v == &issue.id);
                    write_issue(&tx, issue)?;
                    mark_dirty_tx(&tx, &issue.id)?;
                    existing.insert(issue.id.clone(), identity_fingerprint(issue));
                    if !was_remapped {
                        result.created += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(result)
        })
    }
}

// Column list shared by every issue SELECT. Order must match
// `issue_from_row`.
const ISSUE_COLUMNS: &str = "id, title, description, status, priority, issue_type, assignee, \
                             created_at, created_by, updated_at, closed_at, close_reason, \
                             deleted_at, ephemeral, extra";

fn parse_utc(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn parse_utc_sql(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_utc(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[allow(clippy::needless_pass_by_value)]
fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let status_str: String = row.get(3)?;
    let issue_type_str: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(9)?;
    let closed_at: Option<String> = row.get(10)?;
    let deleted_at: Option<String> = row.get(12)?;
    let extra_json: String = row.get(14)?;

    let extra = serde_json::from_str(&extra_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: Status::from_str(&status_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        priority: Priority(row.get(4)?),
        issue_type: IssueType::from_str(&issue_type_str).unwrap_or_default(),
        assignee: row.get(6)?,
        created_at: parse_utc_sql(7, &created_at)?,
        created_by: row.get(8)?,
        updated_at: parse_utc_sql(9, &updated_at)?,
        closed_at: closed_at.as_deref().map(|s| parse_utc_sql(10, s)).transpose()?,
        close_reason: row.get(11)?,
        deleted_at: deleted_at.as_deref().map(|s| parse_utc_sql(12, s)).transpose()?,
        ephemeral: row.get::<_, i64>(13)? != 0,
        labels: Vec::new(),
        dependencies: Vec::new(),
        extra,
    })
}

fn read_issue_row(conn: &Connection, id: &str) -> Result<Option<Issue>> {
    let issue = conn
        .query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"),
            [id],
            issue_from_row,
        )
        .optional()?;
    Ok(issue)
}

fn issue_exists(tx: &Transaction<'_>, id: &str) -> Result<bool> {
    let exists = tx
        .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |_| Ok(()))
        .optional()?
        .is_some();
    Ok(exists)
}

fn mark_dirty_tx(tx: &Transaction<'_>, id: &str) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
        params![id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Write an issue row plus its labels and dependencies (replacing both).
fn write_issue(tx: &Transaction<'_>, issue: &Issue) -> Result<()> {
    let extra_json = serde_json::to_string(&issue.extra)?;
    tx.execute(
        "INSERT OR REPLACE INTO issues (
            id, fingerprint, title, description, status, priority, issue_type,
            assignee, created_at, created_by, updated_at, closed_at,
            close_reason, deleted_at, ephemeral, extra
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            issue.id,
            identity_fingerprint(issue),
            issue.title,
            issue.description,
            issue.status.as_str(),
            issue.priority.0,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.created_at.to_rfc3339(),
            issue.created_by,
            issue.updated_at.to_rfc3339(),
            issue.closed_at.map(|dt| dt.to_rfc3339()),
            issue.close_reason,
            issue.deleted_at.map(|dt| dt.to_rfc3339()),
            i32::from(issue.ephemeral),
            extra_json,
        ],
    )?;

    tx.execute("DELETE FROM labels WHERE issue_id = ?", [&issue.id])?;
    for label in &issue.labels {
        tx.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
            params![issue.id, label],
        )?;
    }

    tx.execute("DELETE FROM dependencies WHERE issue_id = ?", [&issue.id])?;
    for (seq, dep) in issue.dependencies.iter().enumerate() {
        tx.execute(
            "INSERT OR REPLACE INTO dependencies (issue_id, target_id, kind, seq)
             VALUES (?, ?, ?, ?)",
            params![issue.id, dep.target_id, dep.kind.as_str(), seq as i64],
        )?;
    }

    Ok(())
}

fn read_labels(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
    let labels = stmt
        .query_map([issue_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(labels)
}

fn read_dependencies(conn: &Connection, issue_id: &str) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, target_id, kind FROM dependencies WHERE issue_id = ? ORDER BY seq",
    )?;
    let deps = stmt
        .query_map([issue_id], dependency_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deps)
}

fn dependency_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    let kind_str: String = row.get(2)?;
    Ok(Dependency {
        issue_id: row.get(0)?,
        target_id: row.get(1)?,
        kind: DependencyKind::from_str(&kind_str).unwrap_or(DependencyKind::Custom(kind_str)),
    })
}

fn read_all_labels(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (issue_id, label) in rows {
        map.entry(issue_id).or_default().push(label);
    }
    Ok(map)
}

fn read_all_dependencies(conn: &Connection) -> Result<HashMap<String, Vec<Dependency>>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, target_id, kind FROM dependencies ORDER BY issue_id, seq",
    )?;
    let rows = stmt
        .query_map([], dependency_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
    for dep in rows {
        map.entry(dep.issue_id.clone()).or_default().push(dep);
    }
    Ok(map)
}
