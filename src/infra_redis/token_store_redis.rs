use crate::domain_model::{TokenRecord, UserEmail};
use crate::domain_port::{StoreError, TokenStore};
use chrono::Utc;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EXPIRY_CHANNEL_CAP: usize = 64;

/// Shadow copies outlive the primary record by this much, so the expired
/// record can still be read back when the keyspace notification arrives.
const SHADOW_GRACE_MILLIS: u64 = 60_000;

const EXPIRED_EVENT_PATTERN: &str = "__keyevent@*__:expired";

/// Redis-backed token store. Records live as JSON values with a millisecond
/// TTL; a per-owner set indexes tokens by e-mail; TTL evictions come in over
/// keyspace notifications and are republished on a broadcast channel.
pub struct RedisTokenStore {
    conn: ConnectionManager,
    prefix: String,
    op_timeout: Duration,
    expired_tx: broadcast::Sender<TokenRecord>,
    listener: JoinHandle<()>,
}

impl RedisTokenStore {
    /// Connect, enable expiry notifications, and start the listener task.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        op_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let prefix = prefix.into();
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;

        // Keyspace notifications are off by default; expiry events need "Ex".
        if let Err(e) = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!("could not enable keyspace notifications: {e}");
        }

        let (expired_tx, _) = broadcast::channel(EXPIRY_CHANNEL_CAP);
        let listener = tokio::spawn(expiry_listener(
            client,
            conn.clone(),
            prefix.clone(),
            expired_tx.clone(),
        ));

        Ok(Self {
            conn,
            prefix,
            op_timeout,
            expired_tx,
            listener,
        })
    }

    fn token_key(&self, token: &str) -> String {
        format!("{}:token:{}", self.prefix, token)
    }

    fn shadow_key(&self, token: &str) -> String {
        format!("{}:shadow:{}", self.prefix, token)
    }

    fn email_key(&self, email: &UserEmail) -> String {
        format!("{}:email:{}", self.prefix, email)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Unavailable("operation timed out".to_string())),
        }
    }
}

impl Drop for RedisTokenStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn encode(record: &TokenRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| StoreError::Unavailable(e.to_string()))
}

fn decode(raw: &str) -> Option<TokenRecord> {
    match serde_json::from_str::<TokenRecord>(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("undecodable token record in store, skipping: {e}");
            None
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for RedisTokenStore {
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let json = encode(record)?;
        let ttl = record.ttl_millis(Utc::now());
        let token_key = self.token_key(&record.token);
        let shadow_key = self.shadow_key(&record.token);
        let email_key = self.email_key(&record.email);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.pset_ex(&token_key, &json, ttl)
            .ignore()
            .pset_ex(&shadow_key, &json, ttl + SHADOW_GRACE_MILLIS)
            .ignore()
            .sadd(&email_key, &record.token)
            .ignore()
            // Keep the owner index alive at least as long as its longest
            // record; GT never shortens an existing expiry.
            .cmd("PEXPIRE")
            .arg(&email_key)
            .arg(ttl + SHADOW_GRACE_MILLIS)
            .arg("GT")
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn get(&self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let key = self.token_key(token);
        let mut conn = self.conn.clone();
        let raw: Option<String> = self.bounded(conn.get(&key)).await?;
        Ok(raw.as_deref().and_then(decode))
    }

    async fn take(&self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let key = self.token_key(token);
        let mut conn = self.conn.clone();
        // GETDEL is the atomic consume; shadow and index cleanup can trail.
        let raw: Option<String> = self.bounded(conn.get_del(&key)).await?;
        let record = match raw.as_deref().and_then(decode) {
            Some(record) => record,
            None => return Ok(None),
        };

        let mut pipe = redis::pipe();
        pipe.del(self.shadow_key(token))
            .ignore()
            .srem(self.email_key(&record.email), token)
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await?;
        Ok(Some(record))
    }

    async fn find_all_by_email(&self, email: &UserEmail) -> Result<Vec<TokenRecord>, StoreError> {
        let email_key = self.email_key(email);
        let mut conn = self.conn.clone();
        let tokens: Vec<String> = self.bounded(conn.smembers(&email_key)).await?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = tokens.iter().map(|t| self.token_key(t)).collect();
        let raws: Vec<Option<String>> = self.bounded(conn.mget(&keys)).await?;
        // A member whose record already lapsed is skipped, not an error.
        Ok(raws
            .into_iter()
            .flatten()
            .filter_map(|raw| decode(&raw))
            .collect())
    }

    async fn delete_all(&self, records: &[TokenRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for record in records {
            pipe.del(self.token_key(&record.token))
                .ignore()
                .del(self.shadow_key(&record.token))
                .ignore()
                .srem(self.email_key(&record.email), &record.token)
                .ignore();
        }
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    fn watch_expiry(&self) -> broadcast::Receiver<TokenRecord> {
        self.expired_tx.subscribe()
    }
}

async fn expiry_listener(
    client: redis::Client,
    conn: ConnectionManager,
    prefix: String,
    expired_tx: broadcast::Sender<TokenRecord>,
) {
    let token_prefix = format!("{}:token:", prefix);
    loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                tracing::warn!("expiry listener cannot subscribe: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        if let Err(e) = pubsub.psubscribe(EXPIRED_EVENT_PATTERN).await {
            tracing::warn!("expiry listener psubscribe failed: {e}");
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let key: String = match msg.get_payload() {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!("undecodable expiry notification: {e}");
                    continue;
                }
            };
            let Some(token) = key.strip_prefix(&token_prefix) else {
                continue;
            };
            handle_expired_token(conn.clone(), &prefix, token, &expired_tx).await;
        }
        tracing::warn!("expiry notification stream closed, resubscribing");
    }
}

/// Recover the evicted record from its shadow copy and publish it.
async fn handle_expired_token(
    mut conn: ConnectionManager,
    prefix: &str,
    token: &str,
    expired_tx: &broadcast::Sender<TokenRecord>,
) {
    let shadow_key = format!("{}:shadow:{}", prefix, token);
    let raw: Option<String> = match conn.get_del(&shadow_key).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("shadow read failed for expired token: {e}");
            return;
        }
    };
    let Some(record) = raw.as_deref().and_then(decode) else {
        tracing::warn!("expired token had no shadow copy; owner cleanup skipped");
        return;
    };

    let email_key = format!("{}:email:{}", prefix, record.email);
    if let Err(e) = conn.srem::<_, _, ()>(&email_key, token).await {
        tracing::warn!("owner index cleanup failed: {e}");
    }

    tracing::info!(owner = %record.email, kind = %record.kind, "token evicted by ttl");
    let _ = expired_tx.send(record);
}
