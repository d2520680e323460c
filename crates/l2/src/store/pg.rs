//! Postgres implementation of the session workflow store.
//!
//! Every operation opens one transaction, takes the session row lock with
//! `FOR UPDATE`, verifies the stage precondition, applies the transition,
//! and commits. Any error rolls the transaction back wholesale.

use crate::config::DbConfig;
use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::Utc;
use provena_types::commit::{LabelData, PackageData, QcData, SessionData};
use provena_types::error::SessionError;
use provena_types::ids;
use provena_types::session::{
    Courier, Item, Label, Package, PackageStatus, QcRecord, Session, SessionStatus, Supplier,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

const PG_UNIQUE_VIOLATION: &str = "23505";

fn db(e: sqlx::Error) -> SessionError {
    SessionError::Database(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(err) if err.code().as_deref() == Some(PG_UNIQUE_VIOLATION)
    )
}

fn session_from_row(row: &PgRow) -> Result<Session, SessionError> {
    let status: String = row.try_get("status").map_err(db)?;
    Ok(Session {
        session_id: row.try_get("session_id").map_err(db)?,
        operator_id: row.try_get("operator_id").map_err(db)?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| SessionError::Database(format!("bad session status: {}", status)))?,
        is_committed: row.try_get("is_committed").map_err(db)?,
        package_id: row.try_get("package_id").map_err(db)?,
        l1_tx_hash: row.try_get("l1_tx_hash").map_err(db)?,
        l1_block_height: row.try_get("l1_block_height").map_err(db)?,
        l1_commit_time: row.try_get("l1_commit_time").map_err(db)?,
        created_at: row.try_get("created_at").map_err(db)?,
        updated_at: row.try_get("updated_at").map_err(db)?,
    })
}

fn package_from_row(row: &PgRow) -> Result<Package, SessionError> {
    let status: String = row.try_get("status").map_err(db)?;
    Ok(Package {
        package_id: row.try_get("package_id").map_err(db)?,
        signature: row.try_get("signature").map_err(db)?,
        supplier_id: row.try_get("supplier_id").map_err(db)?,
        status: PackageStatus::parse(&status)
            .ok_or_else(|| SessionError::Database(format!("bad package status: {}", status)))?,
        is_trusted: row.try_get("is_trusted").map_err(db)?,
        session_id: row.try_get("session_id").map_err(db)?,
    })
}

const SELECT_SESSION: &str = r#"SELECT session_id, operator_id, status, is_committed, package_id,
       l1_tx_hash, l1_block_height, l1_commit_time, created_at, updated_at
       FROM sessions WHERE session_id = $1"#;

const SELECT_PACKAGE: &str = r#"SELECT package_id, signature, supplier_id, status, is_trusted,
       session_id FROM packages WHERE package_id = $1"#;

async fn fetch_session_for_update(
    txn: &mut Transaction<'_, Postgres>,
    session_id: &str,
) -> Result<Session, SessionError> {
    let sql = format!("{} FOR UPDATE", SELECT_SESSION);
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(&mut **txn)
        .await
        .map_err(db)?;
    match row {
        Some(row) => session_from_row(&row),
        None => Err(SessionError::NotFound(format!("session {}", session_id))),
    }
}

async fn fetch_package_for_update(
    txn: &mut Transaction<'_, Postgres>,
    package_id: &str,
) -> Result<Package, SessionError> {
    let sql = format!("{} FOR UPDATE", SELECT_PACKAGE);
    let row = sqlx::query(&sql)
        .bind(package_id)
        .fetch_optional(&mut **txn)
        .await
        .map_err(db)?;
    match row {
        Some(row) => package_from_row(&row),
        None => Err(SessionError::NotFound(format!("package {}", package_id))),
    }
}

/// Resolves the session's linked package inside the transaction.
async fn fetch_linked_package(
    txn: &mut Transaction<'_, Postgres>,
    session: &Session,
) -> Result<Package, SessionError> {
    let package_id = session.package_id.as_deref().ok_or_else(|| {
        SessionError::PreconditionFailed(format!(
            "session {} has no package linked",
            session.session_id
        ))
    })?;
    fetch_package_for_update(txn, package_id).await
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub async fn connect(config: &DbConfig) -> Result<Self, SessionError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(db)?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!(target: "l2-store", host = %config.host, db = %config.name, "session store connected");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), SessionError> {
        const DDL: &[&str] = &[
            r#"CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                operator_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_committed BOOLEAN NOT NULL DEFAULT FALSE,
                package_id TEXT,
                l1_tx_hash TEXT,
                l1_block_height BIGINT,
                l1_commit_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS packages (
                package_id TEXT PRIMARY KEY,
                signature TEXT NOT NULL DEFAULT '',
                supplier_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_trusted BOOLEAN NOT NULL DEFAULT FALSE,
                session_id TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS suppliers (
                supplier_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                country TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS couriers (
                courier_id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS items (
                item_id TEXT PRIMARY KEY,
                package_id TEXT NOT NULL,
                description TEXT NOT NULL,
                quantity BIGINT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS qc_records (
                qc_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE,
                passed BOOLEAN NOT NULL,
                issues JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS labels (
                label_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE,
                courier_id TEXT NOT NULL,
                tracking_no TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS items_package_id ON items (package_id)",
        ];
        for statement in DDL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, operator_id: &str) -> Result<Session, SessionError> {
        if operator_id.is_empty() {
            return Err(SessionError::PreconditionFailed(
                "operator_id must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        let session = Session {
            session_id: ids::session_id(),
            operator_id: operator_id.to_string(),
            status: SessionStatus::Active,
            is_committed: false,
            package_id: None,
            l1_tx_hash: None,
            l1_block_height: None,
            l1_commit_time: None,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO sessions (session_id, operator_id, status, is_committed,
               created_at, updated_at) VALUES ($1, $2, $3, FALSE, $4, $4)"#,
        )
        .bind(&session.session_id)
        .bind(&session.operator_id)
        .bind(session.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let row = sqlx::query(SELECT_SESSION)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        match row {
            Some(row) => session_from_row(&row),
            None => Err(SessionError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn scan_package(
        &self,
        session_id: &str,
        package_id: &str,
    ) -> Result<(Session, Package), SessionError> {
        let mut txn = self.pool.begin().await.map_err(db)?;

        let mut session = fetch_session_for_update(&mut txn, session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::PreconditionFailed(format!(
                "session {} is not active",
                session_id
            )));
        }
        if let Some(linked) = &session.package_id {
            if linked != package_id {
                return Err(SessionError::Conflict(format!(
                    "session {} already scanned package {}",
                    session_id, linked
                )));
            }
        }

        let mut package = fetch_package_for_update(&mut txn, package_id).await?;
        if let Some(owner) = &package.session_id {
            if owner != session_id {
                return Err(SessionError::Conflict(format!(
                    "package {} is linked to another session",
                    package_id
                )));
            }
        }
        if package.status != PackageStatus::Pending {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} is not awaiting scan",
                package_id
            )));
        }

        let now = Utc::now();
        sqlx::query("UPDATE packages SET status = $2, session_id = $3 WHERE package_id = $1")
            .bind(package_id)
            .bind(PackageStatus::PendingValidation.as_str())
            .bind(session_id)
            .execute(&mut *txn)
            .await
            .map_err(db)?;
        sqlx::query("UPDATE sessions SET package_id = $2, updated_at = $3 WHERE session_id = $1")
            .bind(session_id)
            .bind(package_id)
            .bind(now)
            .execute(&mut *txn)
            .await
            .map_err(db)?;

        txn.commit().await.map_err(db)?;

        package.status = PackageStatus::PendingValidation;
        package.session_id = Some(session_id.to_string());
        session.package_id = Some(package_id.to_string());
        session.updated_at = now;
        Ok((session, package))
    }

    async fn validate_package(
        &self,
        session_id: &str,
        package_id: &str,
        signature: &str,
    ) -> Result<Package, SessionError> {
        // The signature check is deliberately permissive: any non-empty
        // signature is accepted.
        if signature.is_empty() {
            return Err(SessionError::PreconditionFailed(
                "signature must not be empty".to_string(),
            ));
        }
        let mut txn = self.pool.begin().await.map_err(db)?;

        let session = fetch_session_for_update(&mut txn, session_id).await?;
        if session.package_id.as_deref() != Some(package_id) {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} is not linked to session {}",
                package_id, session_id
            )));
        }
        let mut package = fetch_package_for_update(&mut txn, package_id).await?;
        if package.status != PackageStatus::PendingValidation {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} is not awaiting validation",
                package_id
            )));
        }

        sqlx::query(
            r#"UPDATE packages SET signature = $2, is_trusted = TRUE, status = $3
               WHERE package_id = $1"#,
        )
        .bind(package_id)
        .bind(signature)
        .bind(PackageStatus::Validated.as_str())
        .execute(&mut *txn)
        .await
        .map_err(db)?;
        sqlx::query("UPDATE sessions SET updated_at = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(Utc::now())
            .execute(&mut *txn)
            .await
            .map_err(db)?;

        txn.commit().await.map_err(db)?;

        package.signature = signature.to_string();
        package.is_trusted = true;
        package.status = PackageStatus::Validated;
        Ok(package)
    }

    async fn record_qc(
        &self,
        session_id: &str,
        passed: bool,
        issues: &[String],
    ) -> Result<QcRecord, SessionError> {
        let mut txn = self.pool.begin().await.map_err(db)?;

        let session = fetch_session_for_update(&mut txn, session_id).await?;
        let package = fetch_linked_package(&mut txn, &session).await?;
        if package.status != PackageStatus::Validated {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} has not been validated",
                package.package_id
            )));
        }

        let record = QcRecord {
            qc_id: ids::qc_id(),
            session_id: session_id.to_string(),
            passed,
            issues: issues.to_vec(),
            created_at: Utc::now(),
        };
        let issues_json =
            serde_json::to_value(issues).map_err(|e| SessionError::Database(e.to_string()))?;
        let inserted = sqlx::query(
            r#"INSERT INTO qc_records (qc_id, session_id, passed, issues, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&record.qc_id)
        .bind(&record.session_id)
        .bind(record.passed)
        .bind(&issues_json)
        .bind(record.created_at)
        .execute(&mut *txn)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(SessionError::Conflict(format!(
                    "session {} already has a qc record",
                    session_id
                )));
            }
            Err(e) => return Err(db(e)),
        }

        let next_status = if passed {
            PackageStatus::QcPassed
        } else {
            PackageStatus::QcFailed
        };
        sqlx::query("UPDATE packages SET status = $2 WHERE package_id = $1")
            .bind(&package.package_id)
            .bind(next_status.as_str())
            .execute(&mut *txn)
            .await
            .map_err(db)?;
        sqlx::query("UPDATE sessions SET updated_at = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(Utc::now())
            .execute(&mut *txn)
            .await
            .map_err(db)?;

        txn.commit().await.map_err(db)?;
        Ok(record)
    }

    async fn create_label(
        &self,
        session_id: &str,
        courier_id: &str,
    ) -> Result<(Session, Label), SessionError> {
        let mut txn = self.pool.begin().await.map_err(db)?;

        let mut session = fetch_session_for_update(&mut txn, session_id).await?;
        let package = fetch_linked_package(&mut txn, &session).await?;
        if package.status != PackageStatus::QcPassed {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} has not passed quality check",
                package.package_id
            )));
        }

        let courier = sqlx::query("SELECT courier_id FROM couriers WHERE courier_id = $1")
            .bind(courier_id)
            .fetch_optional(&mut *txn)
            .await
            .map_err(db)?;
        if courier.is_none() {
            return Err(SessionError::NotFound(format!("courier {}", courier_id)));
        }

        let label = Label {
            label_id: ids::label_id(),
            session_id: session_id.to_string(),
            courier_id: courier_id.to_string(),
            tracking_no: ids::tracking_no(),
            created_at: Utc::now(),
        };
        let inserted = sqlx::query(
            r#"INSERT INTO labels (label_id, session_id, courier_id, tracking_no, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&label.label_id)
        .bind(&label.session_id)
        .bind(&label.courier_id)
        .bind(&label.tracking_no)
        .bind(label.created_at)
        .execute(&mut *txn)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(SessionError::Conflict(format!(
                    "session {} already has a label",
                    session_id
                )));
            }
            Err(e) => return Err(db(e)),
        }

        let now = Utc::now();
        sqlx::query("UPDATE packages SET status = $2 WHERE package_id = $1")
            .bind(&package.package_id)
            .bind(PackageStatus::Labeled.as_str())
            .execute(&mut *txn)
            .await
            .map_err(db)?;
        sqlx::query("UPDATE sessions SET status = $2, updated_at = $3 WHERE session_id = $1")
            .bind(session_id)
            .bind(SessionStatus::Completed.as_str())
            .bind(now)
            .execute(&mut *txn)
            .await
            .map_err(db)?;

        txn.commit().await.map_err(db)?;

        session.status = SessionStatus::Completed;
        session.updated_at = now;
        Ok((session, label))
    }

    async fn session_view(&self, session_id: &str) -> Result<SessionData, SessionError> {
        let mut txn = self.pool.begin().await.map_err(db)?;

        let row = sqlx::query(SELECT_SESSION)
            .bind(session_id)
            .fetch_optional(&mut *txn)
            .await
            .map_err(db)?;
        let session = match row {
            Some(row) => session_from_row(&row)?,
            None => return Err(SessionError::NotFound(format!("session {}", session_id))),
        };

        let package = match &session.package_id {
            Some(package_id) => {
                let row = sqlx::query(SELECT_PACKAGE)
                    .bind(package_id)
                    .fetch_optional(&mut *txn)
                    .await
                    .map_err(db)?;
                let package = match row {
                    Some(row) => package_from_row(&row)?,
                    None => {
                        return Err(SessionError::Database(format!(
                            "linked package {} is missing",
                            package_id
                        )))
                    }
                };
                let supplier = sqlx::query(
                    "SELECT supplier_id, name, country FROM suppliers WHERE supplier_id = $1",
                )
                .bind(&package.supplier_id)
                .fetch_optional(&mut *txn)
                .await
                .map_err(db)?
                .map(|row| -> Result<Supplier, SessionError> {
                    Ok(Supplier {
                        supplier_id: row.try_get("supplier_id").map_err(db)?,
                        name: row.try_get("name").map_err(db)?,
                        country: row.try_get("country").map_err(db)?,
                    })
                })
                .transpose()?;
                let items = sqlx::query(
                    r#"SELECT item_id, description, quantity FROM items
                       WHERE package_id = $1 ORDER BY item_id"#,
                )
                .bind(package_id)
                .fetch_all(&mut *txn)
                .await
                .map_err(db)?
                .into_iter()
                .map(|row| -> Result<Item, SessionError> {
                    Ok(Item {
                        item_id: row.try_get("item_id").map_err(db)?,
                        description: row.try_get("description").map_err(db)?,
                        quantity: row.try_get("quantity").map_err(db)?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
                Some(PackageData {
                    package_id: package.package_id,
                    signature: package.signature,
                    supplier,
                    items,
                })
            }
            None => None,
        };

        let qc_record = sqlx::query(
            "SELECT qc_id, passed, issues, created_at FROM qc_records WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&mut *txn)
        .await
        .map_err(db)?
        .map(|row| -> Result<QcData, SessionError> {
            let issues: serde_json::Value = row.try_get("issues").map_err(db)?;
            Ok(QcData {
                qc_id: row.try_get("qc_id").map_err(db)?,
                passed: row.try_get("passed").map_err(db)?,
                issues: serde_json::from_value(issues)
                    .map_err(|e| SessionError::Database(e.to_string()))?,
                created_at: row.try_get("created_at").map_err(db)?,
            })
        })
        .transpose()?;

        let label = match sqlx::query(
            r#"SELECT label_id, courier_id, tracking_no, created_at FROM labels
               WHERE session_id = $1"#,
        )
        .bind(session_id)
        .fetch_optional(&mut *txn)
        .await
        .map_err(db)?
        {
            Some(row) => {
                let courier_id: String = row.try_get("courier_id").map_err(db)?;
                let courier =
                    sqlx::query("SELECT courier_id, name FROM couriers WHERE courier_id = $1")
                        .bind(&courier_id)
                        .fetch_optional(&mut *txn)
                        .await
                        .map_err(db)?
                        .map(|row| -> Result<Courier, SessionError> {
                            Ok(Courier {
                                courier_id: row.try_get("courier_id").map_err(db)?,
                                name: row.try_get("name").map_err(db)?,
                            })
                        })
                        .transpose()?;
                Some(LabelData {
                    label_id: row.try_get("label_id").map_err(db)?,
                    tracking_no: row.try_get("tracking_no").map_err(db)?,
                    created_at: row.try_get("created_at").map_err(db)?,
                    courier,
                })
            }
            None => None,
        };

        txn.commit().await.map_err(db)?;

        Ok(SessionData {
            session_id: session.session_id,
            operator_id: session.operator_id,
            status: session.status,
            created_at: session.created_at,
            updated_at: session.updated_at,
            package,
            qc_record,
            label,
        })
    }

    async fn mark_committed(
        &self,
        session_id: &str,
        tx_hash: &str,
        block_height: i64,
    ) -> Result<Session, SessionError> {
        let mut txn = self.pool.begin().await.map_err(db)?;

        let mut session = fetch_session_for_update(&mut txn, session_id).await?;
        if session.is_committed {
            return Err(SessionError::Conflict(format!(
                "session {} is already committed",
                session_id
            )));
        }
        if session.status != SessionStatus::Completed {
            return Err(SessionError::PreconditionFailed(format!(
                "session {} is not completed",
                session_id
            )));
        }

        let now = Utc::now();
        sqlx::query(
            r#"UPDATE sessions SET status = $2, is_committed = TRUE, l1_tx_hash = $3,
               l1_block_height = $4, l1_commit_time = $5, updated_at = $5
               WHERE session_id = $1"#,
        )
        .bind(session_id)
        .bind(SessionStatus::Committed.as_str())
        .bind(tx_hash)
        .bind(block_height)
        .bind(now)
        .execute(&mut *txn)
        .await
        .map_err(db)?;

        txn.commit().await.map_err(db)?;

        session.status = SessionStatus::Committed;
        session.is_committed = true;
        session.l1_tx_hash = Some(tx_hash.to_string());
        session.l1_block_height = Some(block_height);
        session.l1_commit_time = Some(now);
        session.updated_at = now;
        Ok(session)
    }

    async fn upsert_supplier(&self, supplier: &Supplier) -> Result<(), SessionError> {
        sqlx::query(
            r#"INSERT INTO suppliers (supplier_id, name, country) VALUES ($1, $2, $3)
               ON CONFLICT (supplier_id) DO UPDATE SET name = $2, country = $3"#,
        )
        .bind(&supplier.supplier_id)
        .bind(&supplier.name)
        .bind(&supplier.country)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn upsert_courier(&self, courier: &Courier) -> Result<(), SessionError> {
        sqlx::query(
            r#"INSERT INTO couriers (courier_id, name) VALUES ($1, $2)
               ON CONFLICT (courier_id) DO UPDATE SET name = $2"#,
        )
        .bind(&courier.courier_id)
        .bind(&courier.name)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn upsert_package(&self, package: &Package, items: &[Item]) -> Result<(), SessionError> {
        let mut txn = self.pool.begin().await.map_err(db)?;
        sqlx::query(
            r#"INSERT INTO packages (package_id, signature, supplier_id, status, is_trusted, session_id)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (package_id) DO UPDATE
               SET signature = $2, supplier_id = $3, status = $4, is_trusted = $5, session_id = $6"#,
        )
        .bind(&package.package_id)
        .bind(&package.signature)
        .bind(&package.supplier_id)
        .bind(package.status.as_str())
        .bind(package.is_trusted)
        .bind(&package.session_id)
        .execute(&mut *txn)
        .await
        .map_err(db)?;
        for item in items {
            sqlx::query(
                r#"INSERT INTO items (item_id, package_id, description, quantity)
                   VALUES ($1, $2, $3, $4)
                   ON CONFLICT (item_id) DO UPDATE
                   SET package_id = $2, description = $3, quantity = $4"#,
            )
            .bind(&item.item_id)
            .bind(&package.package_id)
            .bind(&item.description)
            .bind(item.quantity)
            .execute(&mut *txn)
            .await
            .map_err(db)?;
        }
        txn.commit().await.map_err(db)?;
        Ok(())
    }
}
