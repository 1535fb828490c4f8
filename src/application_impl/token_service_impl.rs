use crate::application_port::{
    AccessToken, DecodedIdentity, IssuedTokens, RefreshToken, TokenError, TokenService,
};
use crate::domain_model::{RoleName, TokenKind, TokenRecord, UserEmail};
use crate::domain_port::TokenStore;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub signing_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    roles: Vec<RoleName>,
    exp: i64,
    iat: i64,
    iss: String,
    aud: String,
}

fn encode_access(
    email: &UserEmail,
    roles: &[RoleName],
    cfg: &JwtConfig,
) -> Result<(String, DateTime<Utc>, DateTime<Utc>), TokenError> {
    let iat_dt = Utc::now();
    let exp_dt = iat_dt + cfg.access_ttl;
    let claims = AccessClaims {
        sub: email.to_string(),
        roles: roles.to_vec(),
        exp: exp_dt.timestamp(),
        iat: iat_dt.timestamp(),
        iss: cfg.issuer.clone(),
        aud: cfg.audience.clone(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&cfg.signing_key),
    )
    .map_err(|e| TokenError::InternalError(e.to_string()))?;
    Ok((token, iat_dt, exp_dt))
}

fn decode_access(token: &str, cfg: &JwtConfig) -> Result<AccessClaims, TokenError> {
    let mut v = Validation::new(Algorithm::HS256);
    v.validate_exp = true;
    v.set_audience(&[cfg.audience.clone()]);
    v.set_issuer(&[cfg.issuer.clone()]);
    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&cfg.signing_key), &v)
        .map_err(|_| TokenError::Malformed)?;
    Ok(data.claims)
}

const REFRESH_TOKEN_LEN: usize = 50;
const REFRESH_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b',
    'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];

/// HS256 token manager over an expiring store. Access tokens are signed claim
/// sets; refresh tokens are opaque random strings that only mean something as
/// store keys.
pub struct JwtTokenService {
    store: Arc<dyn TokenStore>,
    cfg: JwtConfig,
}

impl JwtTokenService {
    pub fn new(store: Arc<dyn TokenStore>, cfg: JwtConfig) -> Self {
        Self { store, cfg }
    }

    #[inline]
    fn gen_refresh_value() -> String {
        nanoid::nanoid!(REFRESH_TOKEN_LEN, &REFRESH_ALPHABET)
    }

    async fn issue_pair(
        &self,
        email: &UserEmail,
        roles: &[RoleName],
    ) -> Result<IssuedTokens, TokenError> {
        let (access_token, access_exp) = self.issue_access_token(email, roles).await?;
        let (refresh_token, refresh_exp) = self.issue_refresh_token(email, roles).await?;
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        })
    }
}

#[async_trait::async_trait]
impl TokenService for JwtTokenService {
    async fn issue_access_token(
        &self,
        email: &UserEmail,
        roles: &[RoleName],
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError> {
        let (token, iat_dt, exp_dt) = encode_access(email, roles, &self.cfg)?;
        let record = TokenRecord {
            token: token.clone(),
            kind: TokenKind::Access,
            email: email.clone(),
            roles: roles.to_vec(),
            issued_at: iat_dt,
            expires_at: exp_dt,
        };
        self.store.put(&record).await?;
        Ok((AccessToken(token), exp_dt))
    }

    async fn issue_refresh_token(
        &self,
        email: &UserEmail,
        roles: &[RoleName],
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError> {
        let token = Self::gen_refresh_value();
        let iat_dt = Utc::now();
        let exp_dt = iat_dt + self.cfg.refresh_ttl;
        let record = TokenRecord {
            token: token.clone(),
            kind: TokenKind::Refresh,
            email: email.clone(),
            roles: roles.to_vec(),
            issued_at: iat_dt,
            expires_at: exp_dt,
        };
        self.store.put(&record).await?;
        Ok((RefreshToken(token), exp_dt))
    }

    async fn validate(&self, token: &str) -> Result<TokenRecord, TokenError> {
        // Store presence first: a revoked or evicted token fails here no
        // matter how good its signature still looks.
        let record = self.store.get(token).await?.ok_or(TokenError::NotFound)?;
        if record.kind == TokenKind::Access {
            decode_access(token, &self.cfg).map_err(|_| {
                tracing::warn!(owner = %record.email, "stored access token failed verification");
                TokenError::Invalid
            })?;
        }
        Ok(record)
    }

    fn decode_identity(&self, access_token: &str) -> Result<DecodedIdentity, TokenError> {
        let claims = decode_access(access_token, &self.cfg)?;
        let email = claims
            .sub
            .parse::<UserEmail>()
            .map_err(|_| TokenError::Malformed)?;
        Ok(DecodedIdentity {
            email,
            roles: claims.roles,
        })
    }

    async fn revoke_all_for(&self, email: &UserEmail) -> Result<(), TokenError> {
        let records = self.store.find_all_by_email(email).await?;
        for record in &records {
            tracing::info!(owner = %record.email, kind = %record.kind, "revoking token");
        }
        self.store.delete_all(&records).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, TokenError> {
        // Check-and-consume: the atomic take is what makes a replayed or
        // concurrently raced refresh token observe NotFound.
        let record = self
            .store
            .take(refresh_token)
            .await?
            .ok_or(TokenError::NotFound)?;
        if record.kind != TokenKind::Refresh {
            // Not a rotation; put the consumed record back untouched.
            self.store.put(&record).await?;
            return Err(TokenError::WrongTokenType);
        }

        self.revoke_all_for(&record.email).await?;
        self.issue_pair(&record.email, &record.roles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::MemoryTokenStore;

    fn test_config(access_ttl: Duration, refresh_ttl: Duration) -> JwtConfig {
        JwtConfig {
            issuer: "gatehouse.auth".to_string(),
            audience: "gatehouse-client".to_string(),
            access_ttl,
            refresh_ttl,
            signing_key: b"unit-test-signing-key-0123456789".to_vec(),
        }
    }

    fn service_with_ttls(access_ttl: Duration, refresh_ttl: Duration) -> JwtTokenService {
        let store = Arc::new(MemoryTokenStore::new(Duration::from_millis(50)));
        JwtTokenService::new(store, test_config(access_ttl, refresh_ttl))
    }

    fn service() -> JwtTokenService {
        service_with_ttls(Duration::from_secs(3600), Duration::from_secs(7200))
    }

    #[tokio::test]
    async fn access_token_is_valid_until_revoked() {
        let svc = service();
        let alice = UserEmail::from("alice@example.com");

        let (token, _) = svc
            .issue_access_token(&alice, &[RoleName::User])
            .await
            .unwrap();

        let record = svc.validate(&token.0).await.unwrap();
        assert_eq!(record.email, alice);
        assert_eq!(record.roles, vec![RoleName::User]);
        assert_eq!(record.kind, TokenKind::Access);

        svc.revoke_all_for(&alice).await.unwrap();
        assert!(matches!(
            svc.validate(&token.0).await,
            Err(TokenError::NotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn access_token_lapses_after_ttl() {
        let svc = service_with_ttls(Duration::from_millis(500), Duration::from_secs(7200));
        let alice = UserEmail::from("alice@example.com");

        let (token, _) = svc
            .issue_access_token(&alice, &[RoleName::User])
            .await
            .unwrap();
        assert!(svc.validate(&token.0).await.is_ok());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            svc.validate(&token.0).await,
            Err(TokenError::NotFound)
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_cannot_replay() {
        let svc = service();
        let bob = UserEmail::from("bob@example.com");

        let (refresh, _) = svc
            .issue_refresh_token(&bob, &[RoleName::User, RoleName::Admin])
            .await
            .unwrap();

        let rotated = svc.refresh(&refresh.0).await.unwrap();
        let identity = svc.decode_identity(&rotated.access_token.0).unwrap();
        assert_eq!(identity.email, bob);
        assert_eq!(identity.roles, vec![RoleName::User, RoleName::Admin]);

        // Replay of the consumed refresh token.
        assert!(matches!(
            svc.refresh(&refresh.0).await,
            Err(TokenError::NotFound)
        ));

        // The rotated pair works.
        assert!(svc.validate(&rotated.access_token.0).await.is_ok());
        assert!(svc.refresh(&rotated.refresh_token.0).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_revokes_prior_access_tokens() {
        let svc = service();
        let bob = UserEmail::from("bob@example.com");

        let (old_access, _) = svc
            .issue_access_token(&bob, &[RoleName::User])
            .await
            .unwrap();
        let (refresh, _) = svc
            .issue_refresh_token(&bob, &[RoleName::User])
            .await
            .unwrap();

        svc.refresh(&refresh.0).await.unwrap();
        assert!(matches!(
            svc.validate(&old_access.0).await,
            Err(TokenError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_refresh_admits_at_most_one() {
        let svc = Arc::new(service());
        let carol = UserEmail::from("carol@example.com");
        let (refresh, _) = svc
            .issue_refresh_token(&carol, &[RoleName::User])
            .await
            .unwrap();

        let a = {
            let svc = svc.clone();
            let token = refresh.0.clone();
            tokio::spawn(async move { svc.refresh(&token).await })
        };
        let b = {
            let svc = svc.clone();
            let token = refresh.0.clone();
            tokio::spawn(async move { svc.refresh(&token).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(oks, 1, "exactly one concurrent rotation may win");
        for result in [a, b] {
            if let Err(e) = result {
                assert!(matches!(e, TokenError::NotFound));
            }
        }
    }

    #[tokio::test]
    async fn refresh_with_access_token_is_rejected_and_preserved() {
        let svc = service();
        let dave = UserEmail::from("dave@example.com");

        let (access, _) = svc
            .issue_access_token(&dave, &[RoleName::User])
            .await
            .unwrap();

        assert!(matches!(
            svc.refresh(&access.0).await,
            Err(TokenError::WrongTokenType)
        ));
        // The access token survives the failed rotation attempt.
        assert!(svc.validate(&access.0).await.is_ok());
    }

    #[tokio::test]
    async fn forged_token_is_not_found() {
        let svc = service();
        // Signed under a different key, never issued through svc's store.
        let mut other_cfg = test_config(Duration::from_secs(3600), Duration::from_secs(7200));
        other_cfg.signing_key = b"some-other-signing-key-9876543210".to_vec();
        let other = JwtTokenService::new(
            Arc::new(MemoryTokenStore::new(Duration::from_millis(50))),
            other_cfg,
        );
        let (forged, _) = other
            .issue_access_token(&UserEmail::from("mallory@example.com"), &[RoleName::Admin])
            .await
            .unwrap();

        assert!(matches!(
            svc.validate(&forged.0).await,
            Err(TokenError::NotFound)
        ));
    }

    #[tokio::test]
    async fn decode_identity_rejects_garbage() {
        let svc = service();
        assert!(matches!(
            svc.decode_identity("not-a-jwt"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn refresh_values_are_opaque_and_fixed_length() {
        let one = JwtTokenService::gen_refresh_value();
        let two = JwtTokenService::gen_refresh_value();
        assert_eq!(one.len(), REFRESH_TOKEN_LEN);
        assert_ne!(one, two);
        assert!(one.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
