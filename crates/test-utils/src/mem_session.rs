use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use provena_l2::store::SessionStore;
use provena_types::commit::{LabelData, PackageData, QcData, SessionData};
use provena_types::error::SessionError;
use provena_types::ids;
use provena_types::session::{
    Courier, Item, Label, Package, PackageStatus, QcRecord, Session, SessionStatus, Supplier,
};
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    packages: HashMap<String, Package>,
    suppliers: HashMap<String, Supplier>,
    couriers: HashMap<String, Courier>,
    // items by package_id
    items: HashMap<String, Vec<Item>>,
    // qc records and labels by session_id
    qc_records: HashMap<String, QcRecord>,
    labels: HashMap<String, Label>,
}

/// In-memory [`SessionStore`] mirroring the Postgres state machine. The
/// whole store is one mutex, so every operation is trivially atomic.
#[derive(Default)]
pub struct MemSessionStore {
    inner: Mutex<Inner>,
}

impl MemSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

fn session_or_not_found(inner: &Inner, session_id: &str) -> Result<Session, SessionError> {
    inner
        .sessions
        .get(session_id)
        .cloned()
        .ok_or_else(|| SessionError::NotFound(format!("session {}", session_id)))
}

#[async_trait]
impl SessionStore for MemSessionStore {
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
        self.inner
            .lock()
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        session_or_not_found(&self.inner.lock(), session_id)
    }

    async fn scan_package(
        &self,
        session_id: &str,
        package_id: &str,
    ) -> Result<(Session, Package), SessionError> {
        let mut inner = self.inner.lock();
        let session = session_or_not_found(&inner, session_id)?;
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
        let package = inner
            .packages
            .get(package_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("package {}", package_id)))?;
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
        let package = {
            let stored = inner.packages.get_mut(package_id).unwrap();
            stored.status = PackageStatus::PendingValidation;
            stored.session_id = Some(session_id.to_string());
            stored.clone()
        };
        let session = {
            let stored = inner.sessions.get_mut(session_id).unwrap();
            stored.package_id = Some(package_id.to_string());
            stored.updated_at = now;
            stored.clone()
        };
        Ok((session, package))
    }

    async fn validate_package(
        &self,
        session_id: &str,
        package_id: &str,
        signature: &str,
    ) -> Result<Package, SessionError> {
        if signature.is_empty() {
            return Err(SessionError::PreconditionFailed(
                "signature must not be empty".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        let session = session_or_not_found(&inner, session_id)?;
        if session.package_id.as_deref() != Some(package_id) {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} is not linked to session {}",
                package_id, session_id
            )));
        }
        let package = inner
            .packages
            .get(package_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("package {}", package_id)))?;
        if package.status != PackageStatus::PendingValidation {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} is not awaiting validation",
                package_id
            )));
        }
        let stored = inner.packages.get_mut(package_id).unwrap();
        stored.signature = signature.to_string();
        stored.is_trusted = true;
        stored.status = PackageStatus::Validated;
        Ok(stored.clone())
    }

    async fn record_qc(
        &self,
        session_id: &str,
        passed: bool,
        issues: &[String],
    ) -> Result<QcRecord, SessionError> {
        let mut inner = self.inner.lock();
        let session = session_or_not_found(&inner, session_id)?;
        let package_id = session.package_id.clone().ok_or_else(|| {
            SessionError::PreconditionFailed(format!("session {} has no package linked", session_id))
        })?;
        let package = inner
            .packages
            .get(&package_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("package {}", package_id)))?;
        if package.status != PackageStatus::Validated {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} has not been validated",
                package_id
            )));
        }
        if inner.qc_records.contains_key(session_id) {
            return Err(SessionError::Conflict(format!(
                "session {} already has a qc record",
                session_id
            )));
        }

        let record = QcRecord {
            qc_id: ids::qc_id(),
            session_id: session_id.to_string(),
            passed,
            issues: issues.to_vec(),
            created_at: Utc::now(),
        };
        inner
            .qc_records
            .insert(session_id.to_string(), record.clone());
        let stored = inner.packages.get_mut(&package_id).unwrap();
        stored.status = if passed {
            PackageStatus::QcPassed
        } else {
            PackageStatus::QcFailed
        };
        inner.sessions.get_mut(session_id).unwrap().updated_at = Utc::now();
        Ok(record)
    }

    async fn create_label(
        &self,
        session_id: &str,
        courier_id: &str,
    ) -> Result<(Session, Label), SessionError> {
        let mut inner = self.inner.lock();
        let session = session_or_not_found(&inner, session_id)?;
        let package_id = session.package_id.clone().ok_or_else(|| {
            SessionError::PreconditionFailed(format!("session {} has no package linked", session_id))
        })?;
        let package = inner
            .packages
            .get(&package_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("package {}", package_id)))?;
        if package.status != PackageStatus::QcPassed {
            return Err(SessionError::PreconditionFailed(format!(
                "package {} has not passed quality check",
                package_id
            )));
        }
        if !inner.couriers.contains_key(courier_id) {
            return Err(SessionError::NotFound(format!("courier {}", courier_id)));
        }
        if inner.labels.contains_key(session_id) {
            return Err(SessionError::Conflict(format!(
                "session {} already has a label",
                session_id
            )));
        }

        let label = Label {
            label_id: ids::label_id(),
            session_id: session_id.to_string(),
            courier_id: courier_id.to_string(),
            tracking_no: ids::tracking_no(),
            created_at: Utc::now(),
        };
        inner.labels.insert(session_id.to_string(), label.clone());
        inner.packages.get_mut(&package_id).unwrap().status = PackageStatus::Labeled;
        let session = {
            let stored = inner.sessions.get_mut(session_id).unwrap();
            stored.status = SessionStatus::Completed;
            stored.updated_at = Utc::now();
            stored.clone()
        };
        Ok((session, label))
    }

    async fn session_view(&self, session_id: &str) -> Result<SessionData, SessionError> {
        let inner = self.inner.lock();
        let session = session_or_not_found(&inner, session_id)?;

        let package = match &session.package_id {
            Some(package_id) => {
                let package = inner.packages.get(package_id).cloned().ok_or_else(|| {
                    SessionError::Database(format!("linked package {} is missing", package_id))
                })?;
                Some(PackageData {
                    supplier: inner.suppliers.get(&package.supplier_id).cloned(),
                    items: inner.items.get(package_id).cloned().unwrap_or_default(),
                    package_id: package.package_id,
                    signature: package.signature,
                })
            }
            None => None,
        };
        let qc_record = inner.qc_records.get(session_id).map(|record| QcData {
            qc_id: record.qc_id.clone(),
            passed: record.passed,
            issues: record.issues.clone(),
            created_at: record.created_at,
        });
        let label = inner.labels.get(session_id).map(|label| LabelData {
            label_id: label.label_id.clone(),
            tracking_no: label.tracking_no.clone(),
            created_at: label.created_at,
            courier: inner.couriers.get(&label.courier_id).cloned(),
        });

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
        let mut inner = self.inner.lock();
        let session = session_or_not_found(&inner, session_id)?;
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
        let stored = inner.sessions.get_mut(session_id).unwrap();
        stored.status = SessionStatus::Committed;
        stored.is_committed = true;
        stored.l1_tx_hash = Some(tx_hash.to_string());
        stored.l1_block_height = Some(block_height);
        stored.l1_commit_time = Some(now);
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn upsert_supplier(&self, supplier: &Supplier) -> Result<(), SessionError> {
        self.inner
            .lock()
            .suppliers
            .insert(supplier.supplier_id.clone(), supplier.clone());
        Ok(())
    }

    async fn upsert_courier(&self, courier: &Courier) -> Result<(), SessionError> {
        self.inner
            .lock()
            .couriers
            .insert(courier.courier_id.clone(), courier.clone());
        Ok(())
    }

    async fn upsert_package(&self, package: &Package, items: &[Item]) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        inner
            .packages
            .insert(package.package_id.clone(), package.clone());
        inner
            .items
            .insert(package.package_id.clone(), items.to_vec());
        Ok(())
    }
}
