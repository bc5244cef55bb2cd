//! Turso Embedded / libSQL storage layer for contact records.
//!
//! The [`Storage`] struct wraps a libSQL database and implements the
//! [`ContactStore`] collaborator the consolidation engine runs against.
//!
//! **Access rules:**
//! - Engine / CLI `identify`: read-write via [`Storage::open`]
//! - CLI `show`: read-only via [`Storage::open_readonly`]

mod migrations;
mod store;

pub use store::{ContactStore, MergeOutcome};

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use contactlink_shared::{
    Contact, ContactDraft, ContactId, ContactLinkError, LinkPrecedence, Result,
};
use libsql::{Connection, Database, TransactionBehavior, Value, params};
use tokio::sync::Mutex;

const CONTACT_COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at, deleted_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    /// Single connection; transactions must not interleave across callers.
    conn: Mutex<Connection>,
    readonly: bool,
}

fn storage_err(e: libsql::Error) -> ContactLinkError {
    ContactLinkError::StorageUnavailable(e.to_string())
}

/// Fixed-width UTC timestamp so lexical order equals time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ContactLinkError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn: Mutex::new(conn),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ContactLinkError::StorageUnavailable(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn: Mutex::new(conn),
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.conn.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    ContactLinkError::StorageUnavailable(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let conn = self.conn.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ContactLinkError::StorageUnavailable(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Get a contact by ID, including soft-deleted ones.
    pub async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        let conn = self.conn.lock().await;
        let contacts = query_contacts(
            &conn,
            &format!("SELECT {CONTACT_COLUMNS} FROM contact WHERE id = ?1"),
            params![id.0],
        )
        .await?;
        Ok(contacts.into_iter().next())
    }

    /// List every contact, including soft-deleted ones, oldest first.
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn.lock().await;
        query_contacts(
            &conn,
            &format!("SELECT {CONTACT_COLUMNS} FROM contact ORDER BY created_at, id"),
            params![],
        )
        .await
    }

    /// Mark a contact deleted. Returns `false` if it was missing or already deleted.
    pub async fn soft_delete(&self, id: ContactId) -> Result<bool> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let conn = self.conn.lock().await;
        let affected = conn
            .execute(
                "UPDATE contact SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now.as_str(), id.0],
            )
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// ContactStore implementation
// ---------------------------------------------------------------------------

impl ContactStore for Storage {
    async fn find_by_identifiers(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        // NULL never compares equal, so an absent identifier matches nothing.
        query_contacts(
            &conn,
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contact
                 WHERE deleted_at IS NULL AND (email = ?1 OR phone_number = ?2)
                 ORDER BY created_at, id"
            ),
            params![email, phone_number],
        )
        .await
    }

    async fn find_by_primary(&self, primary_id: ContactId) -> Result<Vec<Contact>> {
        let conn = self.conn.lock().await;
        query_contacts(
            &conn,
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contact
                 WHERE deleted_at IS NULL AND (id = ?1 OR linked_id = ?1)
                 ORDER BY created_at, id"
            ),
            params![primary_id.0],
        )
        .await
    }

    async fn insert(&self, draft: ContactDraft) -> Result<Contact> {
        self.check_writable()?;
        draft.validate()?;
        let now = timestamp(Utc::now());
        let conn = self.conn.lock().await;

        let affected = match draft.linked_id {
            None => conn
                .execute(
                    "INSERT INTO contact (email, phone_number, linked_id, link_precedence, created_at, updated_at)
                     VALUES (?1, ?2, NULL, ?3, ?4, ?4)",
                    params![
                        draft.email.as_deref(),
                        draft.phone_number.as_deref(),
                        draft.link_precedence.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?,
            // Conditional on the target still being a live primary, so a
            // concurrent demotion can never leave a secondary-of-secondary.
            Some(linked) => conn
                .execute(
                    "INSERT INTO contact (email, phone_number, linked_id, link_precedence, created_at, updated_at)
                     SELECT ?1, ?2, ?3, ?4, ?5, ?5
                     WHERE EXISTS (
                         SELECT 1 FROM contact
                         WHERE id = ?3 AND link_precedence = 'primary' AND deleted_at IS NULL
                     )",
                    params![
                        draft.email.as_deref(),
                        draft.phone_number.as_deref(),
                        linked.0,
                        draft.link_precedence.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?,
        };

        if affected == 0 {
            return Err(ContactLinkError::MergeConflict(format!(
                "contact {} is no longer a primary",
                draft.linked_id.map(|id| id.0).unwrap_or_default()
            )));
        }

        let id = ContactId(conn.last_insert_rowid());
        let contacts = query_contacts(
            &conn,
            &format!("SELECT {CONTACT_COLUMNS} FROM contact WHERE id = ?1"),
            params![id.0],
        )
        .await?;
        contacts.into_iter().next().ok_or_else(|| {
            ContactLinkError::StorageUnavailable(format!("inserted contact {id} not readable"))
        })
    }

    async fn demote_and_relink(
        &self,
        old_primary_ids: &[ContactId],
        new_primary_id: ContactId,
    ) -> Result<MergeOutcome> {
        self.check_writable()?;
        if old_primary_ids.contains(&new_primary_id) {
            return Err(ContactLinkError::validation(format!(
                "contact {new_primary_id} cannot be merged into itself"
            )));
        }
        let now = timestamp(Utc::now());
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(storage_err)?;

        let outcome = apply_merge(&tx, old_primary_ids, new_primary_id, &now).await;
        match outcome {
            Ok(MergeOutcome::Merged) => {
                tx.commit().await.map_err(storage_err)?;
                Ok(MergeOutcome::Merged)
            }
            Ok(MergeOutcome::Conflict) => {
                tx.rollback().await.map_err(storage_err)?;
                Ok(MergeOutcome::Conflict)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed merge also failed");
                }
                Err(e)
            }
        }
    }
}

/// Body of the merge transaction. Returns `Conflict` as soon as a
/// precondition fails; the caller rolls back.
async fn apply_merge(
    conn: &Connection,
    old_primary_ids: &[ContactId],
    new_primary_id: ContactId,
    now: &str,
) -> Result<MergeOutcome> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM contact
             WHERE id = ?1 AND link_precedence = 'primary' AND deleted_at IS NULL",
            params![new_primary_id.0],
        )
        .await
        .map_err(storage_err)?;
    let survivor_live = match rows.next().await.map_err(storage_err)? {
        Some(row) => row.get::<i64>(0).map_err(storage_err)? > 0,
        None => false,
    };
    if !survivor_live {
        return Ok(MergeOutcome::Conflict);
    }

    for old in old_primary_ids {
        let demoted = conn
            .execute(
                "UPDATE contact SET link_precedence = 'secondary', linked_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND link_precedence = 'primary'",
                params![new_primary_id.0, now, old.0],
            )
            .await
            .map_err(storage_err)?;
        if demoted == 0 {
            return Ok(MergeOutcome::Conflict);
        }

        conn.execute(
            "UPDATE contact SET linked_id = ?1, updated_at = ?2 WHERE linked_id = ?3",
            params![new_primary_id.0, now, old.0],
        )
        .await
        .map_err(storage_err)?;
    }

    Ok(MergeOutcome::Merged)
}

async fn query_contacts(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<Contact>> {
    let mut rows = conn.query(sql, params).await.map_err(storage_err)?;

    let mut results = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        results.push(row_to_contact(&row)?);
    }
    Ok(results)
}

/// Convert a database row (in [`CONTACT_COLUMNS`] order) to a [`Contact`].
fn row_to_contact(row: &libsql::Row) -> Result<Contact> {
    let link_precedence: LinkPrecedence = row
        .get::<String>(4)
        .map_err(storage_err)?
        .parse()?;

    Ok(Contact {
        id: ContactId(row.get::<i64>(0).map_err(storage_err)?),
        email: optional_text(row, 1)?,
        phone_number: optional_text(row, 2)?,
        linked_id: match row.get_value(3).map_err(storage_err)? {
            Value::Null => None,
            Value::Integer(id) => Some(ContactId(id)),
            other => {
                return Err(ContactLinkError::validation(format!(
                    "unexpected linked_id value {other:?}"
                )));
            }
        },
        link_precedence,
        created_at: parse_timestamp(&row.get::<String>(5).map_err(storage_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(6).map_err(storage_err)?)?,
        deleted_at: optional_text(row, 7)?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}

fn optional_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx).map_err(storage_err)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(ContactLinkError::validation(format!(
            "expected text in column {idx}, found {other:?}"
        ))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ContactLinkError::validation(format!("invalid date '{s}': {e}")))
}
