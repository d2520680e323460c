//! Shard registry types.
//!
//! The registry maps `client_group → shard`, with at most one `active` shard
//! per group. Nodes hold a read-mostly in-process cache of the registry,
//! primed at startup and refreshed only on administrative reseed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Active,
    Inactive,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// A self-contained L2 service owning one client group's workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: String,
    pub client_group: String,
    pub l2_endpoint: String,
    pub status: ShardStatus,
}

#[derive(Default)]
struct RegistryInner {
    by_shard: HashMap<String, Shard>,
    // client_group -> shard_id, active shards only
    by_group: HashMap<String, String>,
}

/// Read-mostly cache of the shard registry.
///
/// Cloning is cheap; all clones observe the same map.
#[derive(Clone, Default)]
pub struct ShardRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole cache, e.g. from a fresh `GET /l1/shards` response.
    pub fn replace_all(&self, shards: Vec<Shard>) {
        let mut inner = self.inner.write();
        inner.by_shard.clear();
        inner.by_group.clear();
        for shard in shards {
            if shard.status == ShardStatus::Active {
                inner
                    .by_group
                    .insert(shard.client_group.clone(), shard.shard_id.clone());
            }
            inner.by_shard.insert(shard.shard_id.clone(), shard);
        }
    }

    pub fn insert(&self, shard: Shard) {
        let mut inner = self.inner.write();
        if shard.status == ShardStatus::Active {
            inner
                .by_group
                .insert(shard.client_group.clone(), shard.shard_id.clone());
        } else {
            // An inactive shard must not shadow the group mapping.
            if inner.by_group.get(&shard.client_group) == Some(&shard.shard_id) {
                inner.by_group.remove(&shard.client_group);
            }
        }
        inner.by_shard.insert(shard.shard_id.clone(), shard);
    }

    pub fn by_shard_id(&self, shard_id: &str) -> Option<Shard> {
        self.inner.read().by_shard.get(shard_id).cloned()
    }

    /// The active shard owning `client_group`, if any.
    pub fn by_client_group(&self, client_group: &str) -> Option<Shard> {
        let inner = self.inner.read();
        let shard_id = inner.by_group.get(client_group)?;
        inner.by_shard.get(shard_id).cloned()
    }

    pub fn all(&self) -> Vec<Shard> {
        let mut shards: Vec<Shard> = self.inner.read().by_shard.values().cloned().collect();
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        shards
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_shard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_shard.is_empty()
    }
}
