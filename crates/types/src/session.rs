//! L2 workflow entities.
//!
//! A session advances `active → completed → committed`, one step per stage
//! call, and never skips or regresses. The linked package walks its own
//! lifecycle (`pending → pending_validation → validated → qc_passed/qc_failed
//! → labeled`) in lock-step with the session stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Committed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Committed => "committed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of a package within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    PendingValidation,
    Validated,
    QcPassed,
    QcFailed,
    Labeled,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingValidation => "pending_validation",
            Self::Validated => "validated",
            Self::QcPassed => "qc_passed",
            Self::QcFailed => "qc_failed",
            Self::Labeled => "labeled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "pending_validation" => Some(Self::PendingValidation),
            "validated" => Some(Self::Validated),
            "qc_passed" => Some(Self::QcPassed),
            "qc_failed" => Some(Self::QcFailed),
            "labeled" => Some(Self::Labeled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single workflow instance owned by one shard.
///
/// `l1_tx_hash` / `l1_block_height` / `l1_commit_time` are a best-effort
/// cached copy of the L1 result; the ledger row is authoritative after
/// commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub operator_id: String,
    pub status: SessionStatus,
    pub is_committed: bool,
    pub package_id: Option<String>,
    pub l1_tx_hash: Option<String>,
    pub l1_block_height: Option<i64>,
    pub l1_commit_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub package_id: String,
    pub signature: String,
    pub supplier_id: String,
    pub status: PackageStatus,
    pub is_trusted: bool,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcRecord {
    pub qc_id: String,
    pub session_id: String,
    pub passed: bool,
    pub issues: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub label_id: String,
    pub session_id: String,
    pub courier_id: String,
    pub tracking_no: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub supplier_id: String,
    pub name: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub courier_id: String,
    pub name: String,
}

/// A line item carried by a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub description: String,
    pub quantity: i64,
}
