//! Postgres implementation of the relational index.

use crate::{IndexError, IndexStore, SessionIndexRow, SessionRecord, TransactionRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provena_types::shard::{Shard, ShardStatus};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use tracing::info;

const PG_UNIQUE_VIOLATION: &str = "23505";

fn backend(e: sqlx::Error) -> IndexError {
    IndexError::Backend(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION)
    )
}

/// Connection parameters for the index database.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

#[derive(Clone)]
pub struct PgIndexStore {
    pool: PgPool,
}

impl PgIndexStore {
    /// Connects and bootstraps the schema idempotently.
    pub async fn connect(config: &PgConfig) -> Result<Self, IndexError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!(target: "l1-index", host = %config.host, db = %config.database, "index store connected");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), IndexError> {
        const DDL: &[&str] = &[
            r#"CREATE TABLE IF NOT EXISTS shards (
                shard_id TEXT PRIMARY KEY,
                client_group TEXT NOT NULL,
                l2_endpoint TEXT NOT NULL,
                status TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS l1_sessions (
                session_id TEXT PRIMARY KEY,
                shard_id TEXT NOT NULL,
                client_group TEXT NOT NULL,
                operator_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_committed BOOLEAN NOT NULL,
                tx_hash TEXT,
                session_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS l1_transactions (
                session_id TEXT PRIMARY KEY,
                tx_hash TEXT NOT NULL,
                shard_id TEXT NOT NULL,
                client_group TEXT NOT NULL,
                block_height BIGINT NOT NULL,
                confirmed_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL
            )"#,
            // At most one active shard may own a client group.
            r#"CREATE UNIQUE INDEX IF NOT EXISTS shards_active_client_group
               ON shards (client_group) WHERE status = 'active'"#,
            "CREATE INDEX IF NOT EXISTS l1_sessions_client_group ON l1_sessions (client_group)",
            "CREATE INDEX IF NOT EXISTS l1_sessions_shard_id ON l1_sessions (shard_id)",
            "CREATE INDEX IF NOT EXISTS l1_transactions_tx_hash ON l1_transactions (tx_hash)",
        ];
        for statement in DDL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }

    async fn load_records(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<SessionRecord>, IndexError> {
        // One left-joined query per lookup path; relations stay one-directional.
        let sql = format!(
            r#"SELECT s.session_id, s.shard_id, s.client_group, s.operator_id, s.status,
                      s.is_committed, s.tx_hash, s.session_data, s.created_at,
                      sh.shard_id AS r_shard_id, sh.client_group AS r_client_group,
                      sh.l2_endpoint AS r_l2_endpoint, sh.status AS r_shard_status,
                      t.tx_hash AS t_tx_hash, t.block_height AS t_block_height,
                      t.confirmed_at AS t_confirmed_at, t.status AS t_status
               FROM l1_sessions s
               LEFT JOIN shards sh ON sh.shard_id = s.shard_id
               LEFT JOIN l1_transactions t ON t.session_id = s.session_id
               WHERE s.{} = $1
               ORDER BY s.created_at"#,
            column
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let session = SessionIndexRow {
                session_id: row.try_get("session_id").map_err(backend)?,
                shard_id: row.try_get("shard_id").map_err(backend)?,
                client_group: row.try_get("client_group").map_err(backend)?,
                operator_id: row.try_get("operator_id").map_err(backend)?,
                status: row.try_get("status").map_err(backend)?,
                is_committed: row.try_get("is_committed").map_err(backend)?,
                tx_hash: row.try_get("tx_hash").map_err(backend)?,
                session_data: row.try_get("session_data").map_err(backend)?,
                created_at: row.try_get("created_at").map_err(backend)?,
            };
            let shard = match row.try_get::<Option<String>, _>("r_shard_id").map_err(backend)? {
                Some(shard_id) => {
                    let status: String = row.try_get("r_shard_status").map_err(backend)?;
                    Some(Shard {
                        shard_id,
                        client_group: row.try_get("r_client_group").map_err(backend)?,
                        l2_endpoint: row.try_get("r_l2_endpoint").map_err(backend)?,
                        status: ShardStatus::parse(&status)
                            .ok_or_else(|| IndexError::Backend(format!("bad shard status: {}", status)))?,
                    })
                }
                None => None,
            };
            let transaction = match row
                .try_get::<Option<String>, _>("t_tx_hash")
                .map_err(backend)?
            {
                Some(tx_hash) => Some(TransactionRow {
                    session_id: session.session_id.clone(),
                    tx_hash,
                    shard_id: session.shard_id.clone(),
                    client_group: session.client_group.clone(),
                    block_height: row.try_get("t_block_height").map_err(backend)?,
                    timestamp: row.try_get::<DateTime<Utc>, _>("t_confirmed_at").map_err(backend)?,
                    status: row.try_get("t_status").map_err(backend)?,
                }),
                None => None,
            };
            records.push(SessionRecord {
                session,
                shard,
                transaction,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn insert_session(&self, row: &SessionIndexRow) -> Result<(), IndexError> {
        let result = sqlx::query(
            r#"INSERT INTO l1_sessions
               (session_id, shard_id, client_group, operator_id, status, is_committed,
                tx_hash, session_data, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(&row.session_id)
        .bind(&row.shard_id)
        .bind(&row.client_group)
        .bind(&row.operator_id)
        .bind(&row.status)
        .bind(row.is_committed)
        .bind(&row.tx_hash)
        .bind(&row.session_data)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(IndexError::DuplicateSession(row.session_id.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn set_session_tx_hash(
        &self,
        session_id: &str,
        tx_hash: &str,
    ) -> Result<(), IndexError> {
        let result = sqlx::query("UPDATE l1_sessions SET tx_hash = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(tx_hash)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound);
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM l1_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_transaction(&self, row: &TransactionRow) -> Result<(), IndexError> {
        sqlx::query(
            r#"INSERT INTO l1_transactions
               (session_id, tx_hash, shard_id, client_group, block_height, confirmed_at, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&row.session_id)
        .bind(&row.tx_hash)
        .bind(&row.shard_id)
        .bind(&row.client_group)
        .bind(row.block_height)
        .bind(row.timestamp)
        .bind(&row.status)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn sessions_by_group(
        &self,
        client_group: &str,
    ) -> Result<Vec<SessionRecord>, IndexError> {
        self.load_records("client_group", client_group).await
    }

    async fn sessions_by_shard(&self, shard_id: &str) -> Result<Vec<SessionRecord>, IndexError> {
        self.load_records("shard_id", shard_id).await
    }

    async fn transaction_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionRow>, IndexError> {
        let row = sqlx::query(
            r#"SELECT session_id, tx_hash, shard_id, client_group, block_height,
                      confirmed_at, status
               FROM l1_transactions WHERE tx_hash = $1"#,
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(TransactionRow {
                session_id: row.try_get("session_id").map_err(backend)?,
                tx_hash: row.try_get("tx_hash").map_err(backend)?,
                shard_id: row.try_get("shard_id").map_err(backend)?,
                client_group: row.try_get("client_group").map_err(backend)?,
                block_height: row.try_get("block_height").map_err(backend)?,
                timestamp: row.try_get("confirmed_at").map_err(backend)?,
                status: row.try_get("status").map_err(backend)?,
            })),
            None => Ok(None),
        }
    }

    async fn list_shards(&self) -> Result<Vec<Shard>, IndexError> {
        let rows = sqlx::query(
            "SELECT shard_id, client_group, l2_endpoint, status FROM shards ORDER BY shard_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status").map_err(backend)?;
                Ok(Shard {
                    shard_id: row.try_get("shard_id").map_err(backend)?,
                    client_group: row.try_get("client_group").map_err(backend)?,
                    l2_endpoint: row.try_get("l2_endpoint").map_err(backend)?,
                    status: ShardStatus::parse(&status)
                        .ok_or_else(|| IndexError::Backend(format!("bad shard status: {}", status)))?,
                })
            })
            .collect()
    }

    async fn shard_by_id(&self, shard_id: &str) -> Result<Option<Shard>, IndexError> {
        let row = sqlx::query(
            "SELECT shard_id, client_group, l2_endpoint, status FROM shards WHERE shard_id = $1",
        )
        .bind(shard_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status").map_err(backend)?;
                Ok(Some(Shard {
                    shard_id: row.try_get("shard_id").map_err(backend)?,
                    client_group: row.try_get("client_group").map_err(backend)?,
                    l2_endpoint: row.try_get("l2_endpoint").map_err(backend)?,
                    status: ShardStatus::parse(&status)
                        .ok_or_else(|| IndexError::Backend(format!("bad shard status: {}", status)))?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_shard(&self, shard: &Shard) -> Result<(), IndexError> {
        sqlx::query(
            r#"INSERT INTO shards (shard_id, client_group, l2_endpoint, status)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (shard_id) DO UPDATE
               SET client_group = $2, l2_endpoint = $3, status = $4"#,
        )
        .bind(&shard.shard_id)
        .bind(&shard.client_group)
        .bind(&shard.l2_endpoint)
        .bind(shard.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
