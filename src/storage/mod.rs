//! LinkedAccount storage.
//!
//! One end user's credentials for one App inside one project, persisted in
//! SQLite with the credential JSON sealed at rest (AES-256-GCM, see
//! [`encryption`]). Uniqueness on (project_id, app_name,
//! linked_account_owner_id); re-linking the same owner overwrites in place
//! (last-write-wins, no lock — losing a rare double-link race is accepted).

pub mod encryption;

use crate::apps::SecurityScheme;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// One end user's stored credentials for one App within one project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub project_id: Uuid,
    pub app_name: String,
    /// Caller-supplied end-user identifier, unique within (project, app).
    pub linked_account_owner_id: String,
    /// Must match the App's configured scheme.
    pub security_scheme: SecurityScheme,
    /// Opaque credential blob; shape depends on the scheme.
    pub security_credentials: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkedAccount {
    /// Public representation: everything except the secret material.
    pub fn public(&self) -> PublicLinkedAccount {
        PublicLinkedAccount {
            id: self.id,
            project_id: self.project_id,
            app_name: self.app_name.clone(),
            linked_account_owner_id: self.linked_account_owner_id.clone(),
            security_scheme: self.security_scheme,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// LinkedAccount without `security_credentials`, safe to serialize into API
/// responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicLinkedAccount {
    pub id: Uuid,
    pub project_id: Uuid,
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub security_scheme: SecurityScheme,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed LinkedAccount store with sealed credentials.
pub struct LinkedAccountStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl LinkedAccountStore {
    /// Open (or create) the store.
    ///
    /// `encryption_key` is the base64-encoded 32-byte master key.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open linked account database")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS linked_accounts (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                app_name TEXT NOT NULL,
                linked_account_owner_id TEXT NOT NULL,
                security_scheme TEXT NOT NULL,
                security_credentials TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(project_id, app_name, linked_account_owner_id)
            )
            "#,
            [],
        )
        .context("Failed to create linked_accounts table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_linked_accounts_lookup
             ON linked_accounts(project_id, app_name, linked_account_owner_id)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    /// Insert a LinkedAccount, or overwrite credentials/scheme in place if one
    /// already exists for (project, app, owner). Returns the stored record.
    pub fn upsert(
        &self,
        project_id: Uuid,
        app_name: &str,
        linked_account_owner_id: &str,
        security_scheme: SecurityScheme,
        security_credentials: &serde_json::Value,
    ) -> Result<LinkedAccount> {
        let credentials_json = serde_json::to_string(security_credentials)
            .context("Failed to serialize credentials")?;
        let sealed = encryption::seal(&credentials_json, &self.encryption_key)
            .context("Failed to seal credentials")?;

        let now = Utc::now();
        let id = Uuid::new_v4();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO linked_accounts (
                    id, project_id, app_name, linked_account_owner_id,
                    security_scheme, security_credentials, enabled,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
                ON CONFLICT(project_id, app_name, linked_account_owner_id) DO UPDATE SET
                    security_scheme = excluded.security_scheme,
                    security_credentials = excluded.security_credentials,
                    updated_at = excluded.updated_at
                "#,
                params![
                    id.to_string(),
                    project_id.to_string(),
                    app_name,
                    linked_account_owner_id,
                    security_scheme.as_str(),
                    sealed,
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to upsert linked account")?;

        self.get(project_id, app_name, linked_account_owner_id)?
            .ok_or_else(|| anyhow!("Linked account missing immediately after upsert"))
    }

    /// Fetch one LinkedAccount, decrypting its credentials.
    pub fn get(
        &self,
        project_id: Uuid,
        app_name: &str,
        linked_account_owner_id: &str,
    ) -> Result<Option<LinkedAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, security_scheme, security_credentials, enabled,
                       created_at, updated_at
                FROM linked_accounts
                WHERE project_id = ?1 AND app_name = ?2 AND linked_account_owner_id = ?3
                "#,
            )
            .context("Failed to prepare query")?;

        let row = stmt
            .query_row(
                params![project_id.to_string(), app_name, linked_account_owner_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query linked account")?;

        let Some((id, scheme, sealed, enabled, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let credentials_json = encryption::open(&sealed, &self.encryption_key)
            .context("Failed to open sealed credentials")?;

        Ok(Some(LinkedAccount {
            id: Uuid::parse_str(&id).context("Invalid linked account id")?,
            project_id,
            app_name: app_name.to_string(),
            linked_account_owner_id: linked_account_owner_id.to_string(),
            security_scheme: SecurityScheme::parse(&scheme)
                .ok_or_else(|| anyhow!("Unknown security scheme '{}' in store", scheme))?,
            security_credentials: serde_json::from_str(&credentials_json)
                .context("Stored credentials are not valid JSON")?,
            enabled,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    /// Overwrite only the credential blob of an existing account.
    ///
    /// Used after a token refresh so a refreshed token is never used once and
    /// discarded. Last write wins when two refreshes race.
    pub fn update_credentials(
        &self,
        project_id: Uuid,
        app_name: &str,
        linked_account_owner_id: &str,
        security_credentials: &serde_json::Value,
    ) -> Result<()> {
        let credentials_json = serde_json::to_string(security_credentials)
            .context("Failed to serialize credentials")?;
        let sealed = encryption::seal(&credentials_json, &self.encryption_key)
            .context("Failed to seal credentials")?;

        let updated = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE linked_accounts
                SET security_credentials = ?1, updated_at = ?2
                WHERE project_id = ?3 AND app_name = ?4 AND linked_account_owner_id = ?5
                "#,
                params![
                    sealed,
                    Utc::now().to_rfc3339(),
                    project_id.to_string(),
                    app_name,
                    linked_account_owner_id,
                ],
            )
            .context("Failed to update credentials")?;

        if updated == 0 {
            return Err(anyhow!(
                "No linked account for app '{}' owner '{}'",
                app_name,
                linked_account_owner_id
            ));
        }
        Ok(())
    }

    /// Enable or disable an account. Returns whether one existed.
    pub fn set_enabled(
        &self,
        project_id: Uuid,
        app_name: &str,
        linked_account_owner_id: &str,
        enabled: bool,
    ) -> Result<bool> {
        let updated = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE linked_accounts SET enabled = ?1, updated_at = ?2
                WHERE project_id = ?3 AND app_name = ?4 AND linked_account_owner_id = ?5
                "#,
                params![
                    enabled,
                    Utc::now().to_rfc3339(),
                    project_id.to_string(),
                    app_name,
                    linked_account_owner_id,
                ],
            )
            .context("Failed to update enabled flag")?;
        Ok(updated > 0)
    }

    /// List accounts in a project, optionally filtered by app, without
    /// decrypting credential blobs.
    pub fn list_by_project(
        &self,
        project_id: Uuid,
        app_name: Option<&str>,
    ) -> Result<Vec<PublicLinkedAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, app_name, linked_account_owner_id, security_scheme,
                       enabled, created_at, updated_at
                FROM linked_accounts
                WHERE project_id = ?1 AND (?2 IS NULL OR app_name = ?2)
                ORDER BY app_name, linked_account_owner_id
                "#,
            )
            .context("Failed to prepare query")?;

        let accounts = stmt
            .query_map(params![project_id.to_string(), app_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read rows")?;

        accounts
            .into_iter()
            .map(
                |(id, app_name, owner, scheme, enabled, created_at, updated_at)| {
                    Ok(PublicLinkedAccount {
                        id: Uuid::parse_str(&id).context("Invalid linked account id")?,
                        project_id,
                        app_name,
                        linked_account_owner_id: owner,
                        security_scheme: SecurityScheme::parse(&scheme)
                            .ok_or_else(|| anyhow!("Unknown security scheme '{}'", scheme))?,
                        enabled,
                        created_at: parse_timestamp(&created_at)?,
                        updated_at: parse_timestamp(&updated_at)?,
                    })
                },
            )
            .collect()
    }

    /// Delete one account and its sealed secrets. Returns whether it existed.
    pub fn delete(
        &self,
        project_id: Uuid,
        app_name: &str,
        linked_account_owner_id: &str,
    ) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                DELETE FROM linked_accounts
                WHERE project_id = ?1 AND app_name = ?2 AND linked_account_owner_id = ?3
                "#,
                params![project_id.to_string(), app_name, linked_account_owner_id],
            )
            .context("Failed to delete linked account")?;
        Ok(deleted > 0)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .context("Failed to parse stored timestamp")?
        .with_timezone(&Utc))
}
