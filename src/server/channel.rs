use crate::domain_model::{UserEmail, WsEnvelope};
use crate::server::{ConnMessage, ConnReceiver, ConnSender, PresenceHub};
use std::sync::Arc;

/// Post-handshake connection lifecycle: register with the hub, pump inbound
/// frames, and always unregister on the way out, whatever closed the stream.
pub async fn run_connection(
    hub: Arc<PresenceHub>,
    email: UserEmail,
    token: String,
    s2c: Box<dyn ConnSender>,
    mut c2s: Box<dyn ConnReceiver>,
) {
    if hub.register(&email, token, s2c).await.is_err() {
        // Lost the admission race to a concurrent handshake; the duplicate
        // connection closes here, the established one is untouched.
        tracing::warn!(user = %email, "registration refused, closing duplicate connection");
        return;
    }

    while let Some(result) = c2s.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(user = %email, "connection error: {e}");
                break;
            }
        };
        if !handle_incoming(&hub, &email, message).await {
            break;
        }
    }

    hub.unregister(&email).await;
}

/// Returns false when the connection should wind down.
async fn handle_incoming(hub: &PresenceHub, email: &UserEmail, message: ConnMessage) -> bool {
    match message {
        ConnMessage::Text(text) => {
            match serde_json::from_str::<WsEnvelope>(&text) {
                Ok(envelope) => match envelope.to {
                    Some(to) => {
                        hub.send_private(email, &UserEmail::from(to.as_str()), envelope.content)
                            .await;
                    }
                    None => {
                        tracing::warn!(user = %email, "text frame without recipient, dropped");
                    }
                },
                Err(e) => {
                    tracing::warn!(user = %email, "unparseable text frame: {e}");
                }
            }
            true
        }
        ConnMessage::Binary(_) => {
            tracing::warn!(user = %email, "unexpected binary frame, ignored");
            true
        }
        ConnMessage::Ping | ConnMessage::Pong => {
            tracing::trace!(user = %email, "keepalive frame");
            true
        }
        ConnMessage::Close => false,
    }
}
