use crate::domain_model::{UserEmail, WsEnvelope};
use crate::server::{ConnMessage, ConnSender};
use dashmap::{DashMap, Entry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

type SharedConn = Arc<Mutex<Box<dyn ConnSender>>>;

/// One principal's single live realtime connection.
pub struct PresenceEntry {
    pub email: UserEmail,
    pub token: String,
    conn: SharedConn,
}

#[derive(Debug, thiserror::Error)]
#[error("already connected elsewhere")]
pub struct AlreadyPresent;

/// Identity -> live connection map. At most one entry per identity; a second
/// registration attempt is rejected, never silently replacing the first.
///
/// All map mutations go through `register`/`unregister`; per-identity they are
/// serialized by the map's shard locks and the entry API. Broadcast order
/// across recipients is unspecified.
pub struct PresenceHub {
    entries: DashMap<UserEmail, PresenceEntry>,
    send_timeout: Duration,
}

impl PresenceHub {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            send_timeout,
        }
    }

    pub fn contains(&self, email: &UserEmail) -> bool {
        self.entries.contains_key(email)
    }

    /// Credential the identity's live connection authenticated with, if any.
    pub fn registered_token(&self, email: &UserEmail) -> Option<String> {
        self.entries.get(email).map(|entry| entry.token.clone())
    }

    pub fn snapshot_online(&self) -> Vec<UserEmail> {
        let mut online: Vec<UserEmail> = self.entries.iter().map(|e| e.key().clone()).collect();
        online.sort();
        online
    }

    /// Insert-if-absent: the atomic check-and-register that closes the
    /// admission race. On success the newcomer gets a roster snapshot and
    /// everyone else gets a `login` event.
    pub async fn register(
        &self,
        email: &UserEmail,
        token: impl Into<String>,
        conn: Box<dyn ConnSender>,
    ) -> Result<(), AlreadyPresent> {
        let entry = PresenceEntry {
            email: email.clone(),
            token: token.into(),
            conn: Arc::new(Mutex::new(conn)),
        };
        match self.entries.entry(email.clone()) {
            Entry::Occupied(_) => return Err(AlreadyPresent),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        tracing::info!(user = %email, "presence registered");

        self.broadcast(WsEnvelope::login(email), Some(email)).await;
        let roster = self.snapshot_online();
        self.send_to(email, WsEnvelope::online(&roster)).await;
        Ok(())
    }

    /// Remove and return the entry; the remaining connections get a `logout`
    /// event. Absent key is a logged no-op.
    pub async fn unregister(&self, email: &UserEmail) -> Option<PresenceEntry> {
        match self.entries.remove(email) {
            Some((_, entry)) => {
                tracing::info!(user = %email, "presence unregistered");
                self.broadcast(WsEnvelope::logout(email), None).await;
                Some(entry)
            }
            None => {
                tracing::debug!(user = %email, "unregister for unknown identity, ignoring");
                None
            }
        }
    }

    /// Best-effort direct delivery; an offline recipient drops the message.
    pub async fn send_private(&self, from: &UserEmail, to: &UserEmail, content: String) {
        let envelope = WsEnvelope::private(from, to, content);
        if !self.send_to(to, envelope).await {
            tracing::warn!(user = %to, "private message dropped, recipient offline");
        }
    }

    /// Deliver to every entry except `except`. A failed recipient never
    /// aborts delivery to the rest; its entry is torn down and its own
    /// `logout` is announced.
    pub async fn broadcast(&self, envelope: WsEnvelope, except: Option<&UserEmail>) {
        let mut pending: Vec<(WsEnvelope, Option<UserEmail>)> =
            vec![(envelope, except.cloned())];
        while let Some((envelope, except)) = pending.pop() {
            for email in self.deliver_all(&envelope, except.as_ref()).await {
                if self.entries.remove(&email).is_some() {
                    tracing::warn!(user = %email, "send failed, dropping presence entry");
                    pending.push((WsEnvelope::logout(&email), None));
                }
            }
        }
    }

    /// Returns the identities whose send failed.
    async fn deliver_all(&self, envelope: &WsEnvelope, except: Option<&UserEmail>) -> Vec<UserEmail> {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("unserializable envelope: {e}");
                return Vec::new();
            }
        };
        // Collect handles first; map guards must not be held across sends.
        let targets: Vec<(UserEmail, SharedConn)> = self
            .entries
            .iter()
            .filter(|entry| Some(entry.key()) != except)
            .map(|entry| (entry.key().clone(), entry.value().conn.clone()))
            .collect();

        let mut failed = Vec::new();
        for (email, conn) in targets {
            if let Err(e) = self.send_on(&conn, ConnMessage::Text(text.clone())).await {
                tracing::warn!(user = %email, "broadcast send failed: {e}");
                failed.push(email);
            }
        }
        failed
    }

    async fn send_to(&self, email: &UserEmail, envelope: WsEnvelope) -> bool {
        let conn = match self.entries.get(email) {
            Some(entry) => entry.conn.clone(),
            None => return false,
        };
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("unserializable envelope: {e}");
                return false;
            }
        };
        match self.send_on(&conn, ConnMessage::Text(text)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user = %email, "send failed: {e}");
                false
            }
        }
    }

    /// One slow client cannot stall the rest: every send is bounded.
    async fn send_on(&self, conn: &SharedConn, message: ConnMessage) -> anyhow::Result<()> {
        let mut guard = conn.lock().await;
        tokio::time::timeout(self.send_timeout, guard.send(message))
            .await
            .map_err(|_| anyhow::anyhow!("send timed out"))?
    }

    async fn ping_targets(&self) -> Vec<UserEmail> {
        let targets: Vec<(UserEmail, SharedConn)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().conn.clone()))
            .collect();

        let mut dead = Vec::new();
        for (email, conn) in targets {
            if let Err(e) = self.send_on(&conn, ConnMessage::Ping).await {
                tracing::warn!(user = %email, "ping failed: {e}");
                dead.push(email);
            }
        }
        dead
    }
}

/// Fixed-interval liveness check: a failed ping is a disconnect. Bounds how
/// long a half-open connection can hold the single-session slot.
pub async fn run_heartbeat(hub: Arc<PresenceHub>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("heartbeat loop stopped");
                break;
            }
            _ = ticker.tick() => {
                for email in hub.ping_targets().await {
                    hub.unregister(&email).await;
                }
            }
        }
    }
}
