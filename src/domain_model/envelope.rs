use crate::domain_model::UserEmail;
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const WS_TYPE_ONLINE: &str = "online";
pub const WS_TYPE_LOGIN: &str = "login";
pub const WS_TYPE_LOGOUT: &str = "logout";
pub const WS_TYPE_PRIVATE: &str = "private";

/// Wire envelope for everything delivered over a presence channel.
///
/// `kind` is an open string so application-defined message types pass through
/// untouched; the reserved values are the constants above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    /// Epoch milliseconds, stamped at send time.
    pub date: i64,
}

impl WsEnvelope {
    fn stamped(kind: &str, content: String) -> Self {
        Self {
            from: None,
            to: None,
            kind: kind.to_string(),
            content,
            date: Utc::now().timestamp_millis(),
        }
    }

    pub fn login(email: &UserEmail) -> Self {
        Self::stamped(WS_TYPE_LOGIN, email.to_string())
    }

    pub fn logout(email: &UserEmail) -> Self {
        Self::stamped(WS_TYPE_LOGOUT, email.to_string())
    }

    /// Roster snapshot sent to a freshly registered connection.
    pub fn online(roster: &[UserEmail]) -> Self {
        let joined = roster
            .iter()
            .map(|e| e.0.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Self::stamped(WS_TYPE_ONLINE, joined)
    }

    pub fn private(from: &UserEmail, to: &UserEmail, content: String) -> Self {
        let mut envelope = Self::stamped(WS_TYPE_PRIVATE, content);
        envelope.from = Some(from.to_string());
        envelope.to = Some(to.to_string());
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip_keeps_type_field() {
        let env = WsEnvelope::private(&UserEmail::from("alice"), &UserEmail::from("bob"), "hi".into());
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"private\""));
        let back: WsEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, WS_TYPE_PRIVATE);
        assert_eq!(back.from.as_deref(), Some("alice"));
        assert_eq!(back.to.as_deref(), Some("bob"));
    }

    #[test]
    fn login_and_logout_omit_addressing() {
        let env = WsEnvelope::login(&UserEmail::from("carol"));
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("\"from\""));
        assert!(!json.contains("\"to\""));
        assert_eq!(env.content, "carol");
    }

    #[test]
    fn online_joins_roster_with_commas() {
        let roster = vec![UserEmail::from("alice"), UserEmail::from("bob")];
        let env = WsEnvelope::online(&roster);
        assert_eq!(env.content, "alice,bob");
    }
}
