#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

#[cfg(feature = "database")]
mod sqlite {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool, Transaction};
    use std::str::FromStr;
    use std::time::Duration;
    use tracing::{debug, info};
    use uuid::Uuid;

    use crate::audit::{AuditDraft, AuditEntry};
    use crate::config::DatabaseConfig;
    use crate::error::{CoreError, CoreResult, ValidationError};
    use crate::invoicing::InvoiceNumber;
    use crate::model::{LineItem, TenantId, WorkItem, WorkItemId};
    use crate::store::{check_unique_keys, Commit, Committed, Snapshot, WorkItemStore};

    // Take the write lock at BEGIN so competing writers queue on busy_timeout.
    const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

    /// SQLite-backed store. Records are kept as JSON bodies next to the
    /// columns that carry uniqueness constraints.
    #[derive(Debug, Clone)]
    pub struct SqliteStore {
        pool: SqlitePool,
    }

    impl SqliteStore {
        /// Open (creating if needed) the database and optionally migrate it.
        pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
            if !Sqlite::database_exists(&config.url).await? {
                info!("Creating database at {}", config.url);
                Sqlite::create_database(&config.url).await?;
            }

            let options = SqliteConnectOptions::from_str(&config.url)?
                .foreign_keys(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await?;

            if config.auto_migrate {
                info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&pool).await?;
                info!("Database migrations completed");
            }

            Ok(Self { pool })
        }

        /// Get database pool for queries
        pub fn pool(&self) -> &SqlitePool {
            &self.pool
        }

        /// Close database connections gracefully
        pub async fn shutdown(&self) {
            info!("Shutting down database connections...");
            self.pool.close().await;
            info!("Database connections closed");
        }

        async fn append_audit(
            tx: &mut Transaction<'_, Sqlite>,
            draft: AuditDraft,
            now: DateTime<Utc>,
        ) -> CoreResult<AuditEntry> {
            let sequence: i64 = sqlx::query(
                "SELECT COALESCE(MAX(sequence), 0) + 1 AS next FROM audit_entries WHERE entity_id = ?1",
            )
            .bind(draft.entity_id.to_string())
            .fetch_one(&mut **tx)
            .await?
            .get("next");

            let tenant_sequence: i64 = sqlx::query(
                r#"
                INSERT INTO audit_sequences (tenant_id, last_value) VALUES (?1, 1)
                ON CONFLICT (tenant_id) DO UPDATE SET last_value = last_value + 1
                RETURNING last_value
                "#,
            )
            .bind(draft.tenant_id.to_string())
            .fetch_one(&mut **tx)
            .await?
            .get("last_value");

            let entry = AuditEntry {
                id: Uuid::new_v4(),
                entity_id: draft.entity_id,
                tenant_id: draft.tenant_id,
                action: draft.action,
                actor: draft.actor,
                description: draft.description,
                diff: draft.diff,
                created_at: now,
                sequence: sequence as u64,
                tenant_sequence: tenant_sequence as u64,
            };

            sqlx::query(
                r#"
                INSERT INTO audit_entries
                    (id, entity_id, tenant_id, sequence, tenant_sequence, action, created_at, body)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(entry.id.to_string())
            .bind(entry.entity_id.to_string())
            .bind(entry.tenant_id.to_string())
            .bind(sequence)
            .bind(tenant_sequence)
            .bind(entry.action.as_str())
            .bind(now.to_rfc3339())
            .bind(serde_json::to_string(&entry)?)
            .execute(&mut **tx)
            .await?;

            Ok(entry)
        }

        async fn reserve_invoice(
            tx: &mut Transaction<'_, Sqlite>,
            tenant_id: TenantId,
        ) -> CoreResult<InvoiceNumber> {
            let value: i64 = sqlx::query(
                r#"
                INSERT INTO invoice_sequences (tenant_id, last_value) VALUES (?1, 1)
                ON CONFLICT (tenant_id) DO UPDATE SET last_value = last_value + 1
                RETURNING last_value
                "#,
            )
            .bind(tenant_id.to_string())
            .fetch_one(&mut **tx)
            .await?
            .get("last_value");
            Ok(InvoiceNumber::new(value as u64))
        }

        async fn replace_line_items(
            tx: &mut Transaction<'_, Sqlite>,
            id: WorkItemId,
            items: &[LineItem],
        ) -> CoreResult<()> {
            sqlx::query("DELETE FROM line_items WHERE work_item_id = ?1")
                .bind(id.to_string())
                .execute(&mut **tx)
                .await?;
            for (position, item) in items.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO line_items (work_item_id, position, normalized_name, body)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                )
                .bind(id.to_string())
                .bind(position as i64)
                .bind(item.key.as_str())
                .bind(serde_json::to_string(item)?)
                .execute(&mut **tx)
                .await?;
            }
            Ok(())
        }
    }

    fn unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }

    #[async_trait]
    impl WorkItemStore for SqliteStore {
        async fn insert(&self, work_item: WorkItem, audit: AuditDraft) -> CoreResult<Committed> {
            work_item.check_invariants()?;
            let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO work_items
                    (id, tenant_id, kind, lead_id, status, invoice_number, version, body, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(work_item.id.to_string())
            .bind(work_item.tenant_id.to_string())
            .bind(work_item.kind.as_str())
            .bind(work_item.lead_id.map(|id| id.to_string()))
            .bind(work_item.status().as_str())
            .bind(work_item.invoice_number().map(|n| n.get() as i64))
            .bind(work_item.version() as i64)
            .bind(serde_json::to_string(&work_item)?)
            .bind(work_item.created_at.to_rfc3339())
            .bind(work_item.updated_at().to_rfc3339())
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                return Err(if unique_violation(&err) {
                    CoreError::Conflict {
                        id: work_item.id,
                        expected: 0,
                        found: 0,
                    }
                } else {
                    err.into()
                });
            }

            let entry = Self::append_audit(&mut tx, audit, work_item.created_at).await?;
            tx.commit().await?;
            Ok(Committed {
                work_item,
                audit: entry,
            })
        }

        async fn load(&self, id: WorkItemId) -> CoreResult<Snapshot> {
            let row = sqlx::query("SELECT body FROM work_items WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| CoreError::not_found("work item", id))?;
            let work_item: WorkItem = serde_json::from_str(row.get::<&str, _>("body"))?;

            let rows = sqlx::query(
                "SELECT body FROM line_items WHERE work_item_id = ?1 ORDER BY position ASC",
            )
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
            let line_items = rows
                .iter()
                .map(|row| serde_json::from_str(row.get::<&str, _>("body")))
                .collect::<Result<Vec<LineItem>, _>>()?;

            Ok(Snapshot {
                work_item,
                line_items,
            })
        }

        async fn dependents_of(&self, lead_id: WorkItemId) -> CoreResult<Vec<WorkItem>> {
            let rows = sqlx::query(
                "SELECT body FROM work_items WHERE lead_id = ?1 ORDER BY created_at ASC, id ASC",
            )
            .bind(lead_id.to_string())
            .fetch_all(&self.pool)
            .await?;
            let items = rows
                .iter()
                .map(|row| serde_json::from_str(row.get::<&str, _>("body")))
                .collect::<Result<Vec<WorkItem>, _>>()?;
            Ok(items)
        }

        async fn commit(&self, commit: Commit) -> CoreResult<Committed> {
            let Commit {
                mut work_item,
                line_items,
                assign_invoice,
                audit,
            } = commit;
            let id = work_item.id;
            let expected = work_item.version();

            let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
            let row = sqlx::query("SELECT version, body FROM work_items WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| CoreError::not_found("work item", id))?;
            let found = row.get::<i64, _>("version") as u64;
            if found != expected {
                return Err(CoreError::Conflict {
                    id,
                    expected,
                    found,
                });
            }
            let stored: WorkItem = serde_json::from_str(row.get::<&str, _>("body"))?;

            if let Some(items) = &line_items {
                check_unique_keys(items)?;
            }
            if assign_invoice && work_item.invoice_number().is_none() {
                let number = Self::reserve_invoice(&mut tx, work_item.tenant_id).await?;
                work_item.assign_invoice(number);
            }
            work_item.check_invariants()?;
            work_item.check_update_from(&stored)?;

            let now = Utc::now();
            work_item.touch(now, expected + 1);

            let updated = sqlx::query(
                r#"
                UPDATE work_items
                SET status = ?1, invoice_number = ?2, version = ?3, body = ?4, updated_at = ?5
                WHERE id = ?6 AND version = ?7
                "#,
            )
            .bind(work_item.status().as_str())
            .bind(work_item.invoice_number().map(|n| n.get() as i64))
            .bind(work_item.version() as i64)
            .bind(serde_json::to_string(&work_item)?)
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .bind(expected as i64)
            .execute(&mut *tx)
            .await;

            match updated {
                Ok(result) if result.rows_affected() == 1 => {}
                Ok(_) => {
                    return Err(CoreError::Conflict {
                        id,
                        expected,
                        found: expected + 1,
                    })
                }
                Err(err) if unique_violation(&err) => {
                    return Err(ValidationError::Invariant(format!(
                        "invoice number already issued for tenant {}",
                        work_item.tenant_id
                    ))
                    .into())
                }
                Err(err) => return Err(err.into()),
            }

            if let Some(items) = &line_items {
                Self::replace_line_items(&mut tx, id, items).await?;
            }
            let entry = Self::append_audit(&mut tx, audit, now).await?;
            tx.commit().await?;

            debug!(work_item.id = %id, version = work_item.version(), "Committed work item");
            Ok(Committed {
                work_item,
                audit: entry,
            })
        }

        async fn history(&self, id: WorkItemId) -> CoreResult<Vec<AuditEntry>> {
            let exists = sqlx::query("SELECT 1 FROM work_items WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(CoreError::not_found("work item", id));
            }

            let rows = sqlx::query(
                "SELECT body FROM audit_entries WHERE entity_id = ?1 ORDER BY sequence ASC",
            )
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
            let entries = rows
                .iter()
                .map(|row| serde_json::from_str(row.get::<&str, _>("body")))
                .collect::<Result<Vec<AuditEntry>, _>>()?;
            Ok(entries)
        }
    }

}
