use crate::application_port::{
    AccessToken, DecodedIdentity, IssuedTokens, RefreshToken, TokenError, TokenService,
};
use crate::domain_model::{RoleName, TokenKind, TokenRecord, UserEmail};
use chrono::{DateTime, Duration, Utc};

const FAKE_ACCESS_PREFIX: &str = "fake-access-token:";
const FAKE_REFRESH_PREFIX: &str = "fake-refresh-token:";

#[derive(Debug)]
pub struct FakeTokenService;

impl FakeTokenService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FakeTokenService {
    fn default() -> Self {
        Self::new()
    }
}

fn fake_expiries() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now + Duration::days(1), now + Duration::days(7))
}

// Minimal fake implementation for basic use only.
// Extend to simulate more error cases and configurable responses when needed.
#[async_trait::async_trait]
impl TokenService for FakeTokenService {
    async fn issue_access_token(
        &self,
        email: &UserEmail,
        _roles: &[RoleName],
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError> {
        let (access_exp, _) = fake_expiries();
        Ok((
            AccessToken(format!("{}{}", FAKE_ACCESS_PREFIX, email)),
            access_exp,
        ))
    }

    async fn issue_refresh_token(
        &self,
        email: &UserEmail,
        _roles: &[RoleName],
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError> {
        let (_, refresh_exp) = fake_expiries();
        Ok((
            RefreshToken(format!("{}{}", FAKE_REFRESH_PREFIX, email)),
            refresh_exp,
        ))
    }

    async fn validate(&self, token: &str) -> Result<TokenRecord, TokenError> {
        let (kind, email) = if let Some(email) = token.strip_prefix(FAKE_ACCESS_PREFIX) {
            (TokenKind::Access, email)
        } else if let Some(email) = token.strip_prefix(FAKE_REFRESH_PREFIX) {
            (TokenKind::Refresh, email)
        } else {
            return Err(TokenError::NotFound);
        };
        let now = Utc::now();
        Ok(TokenRecord {
            token: token.to_string(),
            kind,
            email: UserEmail::from(email),
            roles: vec![RoleName::User],
            issued_at: now,
            expires_at: now + Duration::days(1),
        })
    }

    fn decode_identity(&self, access_token: &str) -> Result<DecodedIdentity, TokenError> {
        match access_token.strip_prefix(FAKE_ACCESS_PREFIX) {
            Some(email) => Ok(DecodedIdentity {
                email: UserEmail::from(email),
                roles: vec![RoleName::User],
            }),
            None => Err(TokenError::Malformed),
        }
    }

    async fn revoke_all_for(&self, _email: &UserEmail) -> Result<(), TokenError> {
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, TokenError> {
        let email = refresh_token
            .strip_prefix(FAKE_REFRESH_PREFIX)
            .map(UserEmail::from)
            .ok_or(TokenError::NotFound)?;
        let (access_exp, refresh_exp) = fake_expiries();
        Ok(IssuedTokens {
            access_token: AccessToken(format!("{}{}", FAKE_ACCESS_PREFIX, email)),
            refresh_token: RefreshToken(format!("{}{}", FAKE_REFRESH_PREFIX, email)),
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        })
    }
}
