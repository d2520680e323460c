use async_trait::async_trait;
use parking_lot::Mutex;
use provena_index::{IndexError, IndexStore, SessionIndexRow, SessionRecord, TransactionRow};
use provena_types::shard::Shard;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionIndexRow>,
    // keyed by session_id
    transactions: HashMap<String, TransactionRow>,
    shards: HashMap<String, Shard>,
}

/// In-memory [`IndexStore`] with the same admission-latch semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct MemIndexStore {
    inner: Mutex<Inner>,
}

impl MemIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct seeding used by tests.
    pub fn seed_shard(&self, shard: Shard) {
        self.inner.lock().shards.insert(shard.shard_id.clone(), shard);
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    fn record(inner: &Inner, session: &SessionIndexRow) -> SessionRecord {
        SessionRecord {
            session: session.clone(),
            shard: inner.shards.get(&session.shard_id).cloned(),
            transaction: inner.transactions.get(&session.session_id).cloned(),
        }
    }
}

#[async_trait]
impl IndexStore for MemIndexStore {
    async fn insert_session(&self, row: &SessionIndexRow) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&row.session_id) {
            return Err(IndexError::DuplicateSession(row.session_id.clone()));
        }
        inner.sessions.insert(row.session_id.clone(), row.clone());
        Ok(())
    }

    async fn set_session_tx_hash(
        &self,
        session_id: &str,
        tx_hash: &str,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(session_id) {
            Some(session) => {
                session.tx_hash = Some(tx_hash.to_string());
                Ok(())
            }
            None => Err(IndexError::NotFound),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), IndexError> {
        self.inner.lock().sessions.remove(session_id);
        Ok(())
    }

    async fn insert_transaction(&self, row: &TransactionRow) -> Result<(), IndexError> {
        self.inner
            .lock()
            .transactions
            .insert(row.session_id.clone(), row.clone());
        Ok(())
    }

    async fn sessions_by_group(
        &self,
        client_group: &str,
    ) -> Result<Vec<SessionRecord>, IndexError> {
        let inner = self.inner.lock();
        let mut records: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.client_group == client_group)
            .map(|s| Self::record(&inner, s))
            .collect();
        records.sort_by(|a, b| a.session.created_at.cmp(&b.session.created_at));
        Ok(records)
    }

    async fn sessions_by_shard(&self, shard_id: &str) -> Result<Vec<SessionRecord>, IndexError> {
        let inner = self.inner.lock();
        let mut records: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.shard_id == shard_id)
            .map(|s| Self::record(&inner, s))
            .collect();
        records.sort_by(|a, b| a.session.created_at.cmp(&b.session.created_at));
        Ok(records)
    }

    async fn transaction_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionRow>, IndexError> {
        let inner = self.inner.lock();
        Ok(inner
            .transactions
            .values()
            .find(|t| t.tx_hash == tx_hash)
            .cloned())
    }

    async fn list_shards(&self) -> Result<Vec<Shard>, IndexError> {
        let mut shards: Vec<Shard> = self.inner.lock().shards.values().cloned().collect();
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        Ok(shards)
    }

    async fn shard_by_id(&self, shard_id: &str) -> Result<Option<Shard>, IndexError> {
        Ok(self.inner.lock().shards.get(shard_id).cloned())
    }

    async fn upsert_shard(&self, shard: &Shard) -> Result<(), IndexError> {
        self.inner
            .lock()
            .shards
            .insert(shard.shard_id.clone(), shard.clone());
        Ok(())
    }
}
