//! The session workflow store.
//!
//! Each trait method is one atomic database transaction: it either applies
//! the full stage transition or rolls back with no observable change. Two
//! concurrent transitions on the same session race on the row lock and at
//! most one observes the required precondition.

pub mod pg;

use async_trait::async_trait;
use provena_types::commit::SessionData;
use provena_types::error::SessionError;
use provena_types::session::{Courier, Item, Label, Package, QcRecord, Session, Supplier};

/// Transactional storage behind one shard's session state machine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session in `active` with no package linked.
    async fn create_session(&self, operator_id: &str) -> Result<Session, SessionError>;

    async fn get_session(&self, session_id: &str) -> Result<Session, SessionError>;

    /// Links an existing package to an active session and moves the package
    /// to `pending_validation`.
    async fn scan_package(
        &self,
        session_id: &str,
        package_id: &str,
    ) -> Result<(Session, Package), SessionError>;

    /// Marks the linked package trusted and `validated`. Any non-empty
    /// signature is accepted.
    async fn validate_package(
        &self,
        session_id: &str,
        package_id: &str,
        signature: &str,
    ) -> Result<Package, SessionError>;

    /// Records the quality check verdict and moves the package to
    /// `qc_passed` or `qc_failed`. One QC record per session.
    async fn record_qc(
        &self,
        session_id: &str,
        passed: bool,
        issues: &[String],
    ) -> Result<QcRecord, SessionError>;

    /// Issues a label with a fresh tracking number, moves the package to
    /// `labeled`, and completes the session.
    async fn create_label(
        &self,
        session_id: &str,
        courier_id: &str,
    ) -> Result<(Session, Label), SessionError>;

    /// Assembles the canonical session view submitted to the L1.
    async fn session_view(&self, session_id: &str) -> Result<SessionData, SessionError>;

    /// Terminal transition: `completed → committed`, caching the L1 result.
    async fn mark_committed(
        &self,
        session_id: &str,
        tx_hash: &str,
        block_height: i64,
    ) -> Result<Session, SessionError>;

    // Reference-data surface, exercised by provisioning and tests.

    async fn upsert_supplier(&self, supplier: &Supplier) -> Result<(), SessionError>;

    async fn upsert_courier(&self, courier: &Courier) -> Result<(), SessionError>;

    async fn upsert_package(&self, package: &Package, items: &[Item]) -> Result<(), SessionError>;
}
