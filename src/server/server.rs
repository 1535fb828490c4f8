use crate::application_impl::{JwtConfig, JwtTokenService};
use crate::application_port::TokenService;
use crate::domain_model::{TokenKind, TokenRecord};
use crate::domain_port::TokenStore;
use crate::infra_redis::RedisTokenStore;
use crate::server::{AdmissionGate, PresenceHub, run_heartbeat};
use crate::settings::Settings;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Server {
    pub token_service: Arc<dyn TokenService>,
    pub presence_hub: Arc<PresenceHub>,
    pub admission_gate: Arc<AdmissionGate>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Server {
    /// Production wiring: Redis-backed store, JWT manager, presence hub.
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let signing_key = std::env::var("JWT_SIGNING_KEY")
            .unwrap_or_else(|_| settings.auth.signing_key.clone())
            .into_bytes();

        let store = Arc::new(
            RedisTokenStore::connect(
                &settings.store.url,
                settings.store.prefix.clone(),
                Duration::from_millis(settings.store.op_timeout_ms),
            )
            .await?,
        );
        let expiry_rx = store.watch_expiry();

        let store: Arc<dyn TokenStore> = store;
        let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::new(
            store.clone(),
            JwtConfig {
                issuer: settings.auth.issuer.clone(),
                audience: settings.auth.audience.clone(),
                access_ttl: Duration::from_secs(settings.auth.access_ttl_secs),
                refresh_ttl: Duration::from_secs(settings.auth.refresh_ttl_secs),
                signing_key,
            },
        ));

        let server = Self::new(
            token_service,
            expiry_rx,
            Duration::from_secs(settings.ws.heartbeat_secs),
            Duration::from_millis(settings.ws.send_timeout_ms),
        );
        info!("server started");
        Ok(server)
    }

    /// Assemble from externally built components. Tests wire an in-memory
    /// store through here; nothing in the system reaches for globals.
    pub fn new(
        token_service: Arc<dyn TokenService>,
        expiry_rx: broadcast::Receiver<TokenRecord>,
        heartbeat_period: Duration,
        send_timeout: Duration,
    ) -> Self {
        let presence_hub = Arc::new(PresenceHub::new(send_timeout));
        let admission_gate = Arc::new(AdmissionGate::new(
            token_service.clone(),
            presence_hub.clone(),
        ));

        let cancel = CancellationToken::new();
        let heartbeat_handle = tokio::spawn(run_heartbeat(
            presence_hub.clone(),
            heartbeat_period,
            cancel.clone(),
        ));
        let cleanup_handle = tokio::spawn(run_expiry_cleanup(
            presence_hub.clone(),
            expiry_rx,
            cancel.clone(),
        ));

        Self {
            token_service,
            presence_hub,
            admission_gate,
            heartbeat_handle: Mutex::new(Some(heartbeat_handle)),
            cleanup_handle: Mutex::new(Some(cleanup_handle)),
            cancel,
        }
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");
        self.cancel.cancel();

        if let Ok(mut lock) = self.heartbeat_handle.lock() {
            if let Some(handle) = lock.take() {
                let r = handle.await;
                info!("heartbeat handle dropped: {:?}", r);
            }
        }
        if let Ok(mut lock) = self.cleanup_handle.lock() {
            if let Some(handle) = lock.take() {
                let r = handle.await;
                info!("cleanup handle dropped: {:?}", r);
            }
        }
    }
}

/// Consume store evictions and tear down the presence of owners whose backing
/// access token lapsed without an explicit logout.
async fn run_expiry_cleanup(
    hub: Arc<PresenceHub>,
    mut expiry_rx: broadcast::Receiver<TokenRecord>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("expiry cleanup stopped");
                break;
            }
            received = expiry_rx.recv() => match received {
                Ok(record) => match record.kind {
                    TokenKind::Access => {
                        // Only drop the session that this very token backs;
                        // a connection re-authenticated since then keeps its
                        // slot until its own token dies.
                        let backing = hub.registered_token(&record.email);
                        if backing.as_deref() == Some(record.token.as_str()) {
                            tracing::info!(owner = %record.email, "access token lapsed, dropping live session");
                            hub.unregister(&record.email).await;
                        }
                    }
                    TokenKind::Refresh => {
                        tracing::debug!(owner = %record.email, "refresh token lapsed");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("expiry cleanup lagged, {skipped} evictions missed");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!("expiry channel closed, cleanup exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::FakeTokenService;
    use crate::domain_model::{RoleName, UserEmail};
    use crate::server::{ConnMessage, ConnSender};
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn conn() -> Box<dyn ConnSender> {
        let (tx, rx) = mpsc::channel::<ConnMessage>(16);
        std::mem::forget(rx);
        Box::new(tx)
    }

    fn expired(token: &str, email: &str, kind: TokenKind) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            token: token.to_string(),
            kind,
            email: UserEmail::from(email),
            roles: vec![RoleName::User],
            issued_at: now,
            expires_at: now,
        }
    }

    #[tokio::test]
    async fn access_expiry_drops_the_backing_session_only() {
        let (expiry_tx, expiry_rx) = broadcast::channel(8);
        let server = Server::new(
            Arc::new(FakeTokenService::new()),
            expiry_rx,
            Duration::from_secs(600),
            Duration::from_millis(200),
        );
        let alice = UserEmail::from("alice");
        let bob = UserEmail::from("bob");
        server
            .presence_hub
            .register(&alice, "tok-alice", conn())
            .await
            .unwrap();
        server
            .presence_hub
            .register(&bob, "tok-bob", conn())
            .await
            .unwrap();

        // A stale token of alice's that is not backing the live session.
        expiry_tx
            .send(expired("tok-old", "alice", TokenKind::Access))
            .unwrap();
        // A refresh eviction never touches presence.
        expiry_tx
            .send(expired("tok-bob-refresh", "bob", TokenKind::Refresh))
            .unwrap();
        // The token actually backing alice's connection.
        expiry_tx
            .send(expired("tok-alice", "alice", TokenKind::Access))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!server.presence_hub.contains(&alice));
        assert!(server.presence_hub.contains(&bob));

        server.shutdown().await;
    }
}
