use crate::domain_model::{TokenRecord, UserEmail};
use crate::domain_port::{StoreError, TokenStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const EXPIRY_CHANNEL_CAP: usize = 64;

struct StoredEntry {
    record: TokenRecord,
    deadline: Instant,
}

/// In-process token store driven by the tokio clock, so TTL behavior is
/// exercised under paused test time. Mirrors the Redis store's contract:
/// eviction is the store's job and evictions are published to subscribers.
pub struct MemoryTokenStore {
    entries: Arc<Mutex<HashMap<String, StoredEntry>>>,
    expired_tx: broadcast::Sender<TokenRecord>,
    sweeper: JoinHandle<()>,
}

impl MemoryTokenStore {
    pub fn new(sweep_interval: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<String, StoredEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (expired_tx, _) = broadcast::channel(EXPIRY_CHANNEL_CAP);

        let sweeper = tokio::spawn(sweep_loop(entries.clone(), expired_tx.clone(), sweep_interval));

        Self {
            entries,
            expired_tx,
            sweeper,
        }
    }

    fn evict_if_lapsed(
        entries: &mut HashMap<String, StoredEntry>,
        expired_tx: &broadcast::Sender<TokenRecord>,
        token: &str,
    ) {
        let lapsed = entries
            .get(token)
            .map(|e| e.deadline <= Instant::now())
            .unwrap_or(false);
        if lapsed {
            if let Some(entry) = entries.remove(token) {
                let _ = expired_tx.send(entry.record);
            }
        }
    }
}

impl Drop for MemoryTokenStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

async fn sweep_loop(
    entries: Arc<Mutex<HashMap<String, StoredEntry>>>,
    expired_tx: broadcast::Sender<TokenRecord>,
    sweep_interval: Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let evicted: Vec<TokenRecord> = {
            let mut map = match entries.lock() {
                Ok(map) => map,
                Err(_) => return,
            };
            let lapsed: Vec<String> = map
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect();
            lapsed
                .into_iter()
                .filter_map(|k| map.remove(&k))
                .map(|e| e.record)
                .collect()
        };
        for record in evicted {
            let _ = expired_tx.send(record);
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let deadline = Instant::now() + Duration::from_millis(record.ttl_millis(Utc::now()));
        let mut map = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        map.insert(
            record.token.clone(),
            StoredEntry {
                record: record.clone(),
                deadline,
            },
        );
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::evict_if_lapsed(&mut map, &self.expired_tx, token);
        Ok(map.get(token).map(|e| e.record.clone()))
    }

    async fn take(&self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::evict_if_lapsed(&mut map, &self.expired_tx, token);
        Ok(map.remove(token).map(|e| e.record))
    }

    async fn find_all_by_email(&self, email: &UserEmail) -> Result<Vec<TokenRecord>, StoreError> {
        let now = Instant::now();
        let map = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(map
            .values()
            .filter(|e| e.deadline > now && &e.record.email == email)
            .map(|e| e.record.clone())
            .collect())
    }

    async fn delete_all(&self, records: &[TokenRecord]) -> Result<(), StoreError> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        for record in records {
            map.remove(&record.token);
        }
        Ok(())
    }

    fn watch_expiry(&self) -> broadcast::Receiver<TokenRecord> {
        self.expired_tx.subscribe()
    }
}
