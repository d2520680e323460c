//! Shared fixtures for pipeline and workflow tests.

use chrono::Utc;
use provena_l2::store::SessionStore;
use provena_types::commit::{CommitRequest, SessionData};
use provena_types::session::{Courier, Item, Package, PackageStatus, SessionStatus, Supplier};
use provena_types::shard::{Shard, ShardStatus};

pub fn shard(shard_id: &str, client_group: &str, l2_endpoint: &str) -> Shard {
    Shard {
        shard_id: shard_id.to_string(),
        client_group: client_group.to_string(),
        l2_endpoint: l2_endpoint.to_string(),
        status: ShardStatus::Active,
    }
}

/// A minimal, valid commit request for pipeline tests.
pub fn commit_request(session_id: &str, shard_id: &str, client_group: &str) -> CommitRequest {
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

/// Seeds the reference rows the happy-path workflow expects: supplier
/// `SUP-001`, courier `CUR-001`, and pending package `PKG-001` with two
/// line items.
pub async fn seed_reference_data<S: SessionStore + ?Sized>(store: &S) {
    store
        .upsert_supplier(&Supplier {
            supplier_id: "SUP-001".to_string(),
            name: "Acme Electronics".to_string(),
            country: "SG".to_string(),
        })
        .await
        .unwrap();
    store
        .upsert_courier(&Courier {
            courier_id: "CUR-001".to_string(),
            name: "Falcon Express".to_string(),
        })
        .await
        .unwrap();
    store
        .upsert_package(
            &Package {
                package_id: "PKG-001".to_string(),
                signature: String::new(),
                supplier_id: "SUP-001".to_string(),
                status: PackageStatus::Pending,
                is_trusted: false,
                session_id: None,
            },
            &[
                Item {
                    item_id: "ITM-001".to_string(),
                    description: "MCU boards".to_string(),
                    quantity: 40,
                },
                Item {
                    item_id: "ITM-002".to_string(),
                    description: "Power adapters".to_string(),
                    quantity: 12,
                },
            ],
        )
        .await
        .unwrap();
}
