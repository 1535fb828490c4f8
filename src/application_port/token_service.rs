use crate::domain_model::{RoleName, TokenRecord, UserEmail};
use crate::domain_port::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Token absent from the store: never issued, revoked, or evicted by TTL.
    #[error("token not found")]
    NotFound,
    /// Access token failed signature or structural verification.
    #[error("token invalid")]
    Invalid,
    /// Claims could not be decoded at all (bad structure, bad signature, or
    /// past its embedded expiry).
    #[error("token malformed")]
    Malformed,
    /// A non-refresh token was handed to the rotation endpoint.
    #[error("wrong token type")]
    WrongTokenType,
    /// Backing store unreachable or timed out. Retryable; must never be
    /// reported as an authentication failure.
    #[error("token store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => TokenError::StoreUnavailable(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct RefreshToken(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct IssuedTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Claims carried inside an access token, reconstructed by decoding; never
/// persisted on their own.
#[derive(Debug, Clone)]
pub struct DecodedIdentity {
    pub email: UserEmail,
    pub roles: Vec<RoleName>,
}

#[async_trait::async_trait]
pub trait TokenService: Send + Sync {
    /// Sign and persist a fresh access token for the owner.
    async fn issue_access_token(
        &self,
        email: &UserEmail,
        roles: &[RoleName],
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError>;

    /// Generate and persist an opaque refresh token for the owner.
    async fn issue_refresh_token(
        &self,
        email: &UserEmail,
        roles: &[RoleName],
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError>;

    /// Double check: store presence first, then signature validity for access
    /// tokens. A validly signed but revoked token fails on the store lookup.
    async fn validate(&self, token: &str) -> Result<TokenRecord, TokenError>;

    /// Decode the owner identity from signed claims without touching the
    /// store. Fast path for handshake admission.
    fn decode_identity(&self, access_token: &str) -> Result<DecodedIdentity, TokenError>;

    /// Delete every record for the owner: access and refresh alike.
    async fn revoke_all_for(&self, email: &UserEmail) -> Result<(), TokenError>;

    /// Rotate: consume the refresh token, revoke all prior tokens for its
    /// owner, and issue a fresh pair. A replayed refresh token observes
    /// `NotFound`.
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, TokenError>;
}
