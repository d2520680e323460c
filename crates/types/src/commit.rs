//! The canonical shard-commit record.
//!
//! This is the wire shape an L2 shard submits to `POST /l1/commit` and the
//! exact bytes the consensus engine orders. The `session_data` blob is frozen
//! at commit time and never mutated by the L1.

use crate::error::CommitError;
use crate::session::{Courier, Item, SessionStatus, Supplier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageData {
    pub package_id: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier: Option<Supplier>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcData {
    pub qc_id: String,
    pub passed: bool,
    pub issues: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelData {
    pub label_id: String,
    pub tracking_no: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courier: Option<Courier>,
}

/// The frozen session view embedded in a commit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub operator_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qc_record: Option<QcData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelData>,
}

/// A shard-commit transaction as submitted to the L1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub shard_id: String,
    pub client_group: String,
    pub session_id: String,
    pub operator_id: String,
    pub session_data: SessionData,
    pub l2_node_id: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitRequest {
    /// Rejects requests missing any identity field. Runs identically in the
    /// HTTP layer, `CheckTx`, and `ProcessProposal`.
    pub fn validate(&self) -> Result<(), CommitError> {
        if self.shard_id.is_empty() {
            return Err(CommitError::MissingField("shard_id"));
        }
        if self.session_id.is_empty() {
            return Err(CommitError::MissingField("session_id"));
        }
        if self.client_group.is_empty() {
            return Err(CommitError::MissingField("client_group"));
        }
        Ok(())
    }

    pub fn tx_id(&self) -> String {
        hex::encode(tx_id_digest(&self.session_id, &self.shard_id))
    }
}

/// The deterministic transaction identity: `SHA-256(session_id ∥ shard_id)`.
///
/// Byte-identical on every replica; used as the ledger key suffix and as the
/// per-transaction execution data that feeds the block app hash.
pub fn tx_id_digest(session_id: &str, shard_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(shard_id.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(shard_id: &str, session_id: &str, client_group: &str) -> CommitRequest {
        let now = Utc::now();
        CommitRequest {
            shard_id: shard_id.to_string(),
            client_group: client_group.to_string(),
            session_id: session_id.to_string(),
            operator_id: "OPR-001".to_string(),
            session_data: SessionData {
                session_id: session_id.to_string(),
                operator_id: "OPR-001".to_string(),
                status: SessionStatus::Completed,
                created_at: now,
                updated_at: now,
                package: None,
                qc_record: None,
                label: None,
            },
            l2_node_id: "l2-node-1".to_string(),
            timestamp: now,
        }
    }

    #[test]
    fn validate_rejects_empty_identity_fields() {
        assert!(request("shard-a", "SES-0a1b2c3d", "group-a").validate().is_ok());
        assert!(matches!(
            request("", "SES-0a1b2c3d", "group-a").validate(),
            Err(CommitError::MissingField("shard_id"))
        ));
        assert!(matches!(
            request("shard-a", "", "group-a").validate(),
            Err(CommitError::MissingField("session_id"))
        ));
        assert!(matches!(
            request("shard-a", "SES-0a1b2c3d", "").validate(),
            Err(CommitError::MissingField("client_group"))
        ));
    }

    #[test]
    fn tx_id_depends_on_both_identity_parts() {
        let a = request("shard-a", "SES-00000001", "group-a").tx_id();
        let b = request("shard-b", "SES-00000001", "group-b").tx_id();
        let c = request("shard-a", "SES-00000002", "group-a").tx_id();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Concatenation order is session_id then shard_id.
        let expected = hex::encode(Sha256::digest(b"SES-00000001shard-a"));
        assert_eq!(a, expected);
    }

    #[test]
    fn session_data_round_trips_without_optional_stages() {
        let req = request("shard-a", "SES-0a1b2c3d", "group-a");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json["session_data"].get("package").is_none());
        let back: CommitRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.session_id, req.session_id);
    }
}
