use crate::domain_model::{RoleName, UserEmail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record kinds stored in the expiring cache. The expiry handler dispatches on
/// this tag with an exhaustive match.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// One issued token as persisted in the token store, keyed by the token value.
///
/// `roles` ride along so rotation can re-mint an access token without a user
/// lookup; refresh tokens stay pure lookup keys on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub kind: TokenKind,
    pub email: UserEmail,
    pub roles: Vec<RoleName>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Remaining lifetime in whole milliseconds, clamped to at least one so a
    /// record just about to lapse still lands in the store with a real TTL.
    pub fn ttl_millis(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.expires_at - now).num_milliseconds();
        if millis <= 0 { 1 } else { millis as u64 }
    }
}
