use crate::application_port::TokenService;
use crate::domain_model::UserEmail;
use crate::server::PresenceHub;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("access_token parameter missing")]
    MissingToken,
    #[error("credential malformed")]
    Malformed,
    #[error("already connected elsewhere")]
    AlreadyPresent,
}

/// Extract the credential from a connection request's raw query string.
///
/// This is the one place identity material is pulled out of an upgrade
/// request; both the pre-handshake check and the post-handshake registration
/// go through it, so the two phases can never disagree on the identity.
pub fn access_token_from_query(query: &str) -> Result<String, AdmissionError> {
    for pair in query.split('&') {
        if let Some(("access_token", value)) = pair.split_once('=') {
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }
    Err(AdmissionError::MissingToken)
}

/// Decides whether an inbound realtime-connection request may proceed, before
/// the websocket is established. Fail closed on anything odd.
///
/// The fair lock serializes admission decisions; the window between a granted
/// admission and the later registration is closed by the hub's atomic
/// insert-if-absent, so a racing duplicate loses at registration time.
pub struct AdmissionGate {
    tokens: Arc<dyn TokenService>,
    presence: Arc<PresenceHub>,
    lock: Mutex<()>,
}

impl AdmissionGate {
    pub fn new(tokens: Arc<dyn TokenService>, presence: Arc<PresenceHub>) -> Self {
        Self {
            tokens,
            presence,
            lock: Mutex::new(()),
        }
    }

    pub async fn admit(&self, query: &str) -> Result<UserEmail, AdmissionError> {
        let _guard = self.lock.lock().await;

        let token = access_token_from_query(query)?;
        let identity = self.tokens.decode_identity(&token).map_err(|e| {
            tracing::warn!("rejecting connection attempt, credential decode failed: {e}");
            AdmissionError::Malformed
        })?;

        if self.presence.contains(&identity.email) {
            tracing::warn!(user = %identity.email, "rejecting connection attempt, session already live");
            return Err(AdmissionError::AlreadyPresent);
        }
        Ok(identity.email)
    }
}
