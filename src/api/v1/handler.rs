use super::error::*;
use crate::application_port::{IssuedTokens, TokenService};
use crate::domain_model::{RoleName, TokenRecord, UserEmail};
use crate::logger::*;
use crate::server::{PresenceHub, access_token_from_query, run_connection};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::{self, reject};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueTokensRequest {
    pub email: UserEmail,
    pub roles: Vec<RoleName>,
}

#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub email: UserEmail,
    pub tokens: IssuedTokens,
}

/// Trusted seam for the upstream authentication controller: it has already
/// verified credentials before asking for a pair.
pub async fn issue_tokens(
    body: IssueTokensRequest,
    token_service: Arc<dyn TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let (access_token, access_exp) = token_service
        .issue_access_token(&body.email, &body.roles)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    let (refresh_token, refresh_exp) = token_service
        .issue_refresh_token(&body.email, &body.roles)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let response = TokenPairResponse {
        email: body.email,
        tokens: IssuedTokens {
            access_token,
            refresh_token,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        },
    };
    Ok(warp::reply::json(&ApiResponse::ok(response)))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

pub async fn refresh(
    body: RefreshRequest,
    token_service: Arc<dyn TokenService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let tokens = token_service
        .refresh(&body.token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(tokens)))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse;

/// Revocation cascades to the live session: every token for the owner goes,
/// and so does any registered presence entry.
pub async fn logout(
    record: TokenRecord,
    token_service: Arc<dyn TokenService>,
    presence_hub: Arc<PresenceHub>,
) -> Result<impl warp::Reply, warp::Rejection> {
    token_service
        .revoke_all_for(&record.email)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    presence_hub.unregister(&record.email).await;
    info!(user = %record.email, "logged out, tokens revoked");

    Ok(warp::reply::json(&ApiResponse::ok(LogoutResponse)))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub email: UserEmail,
    pub roles: Vec<RoleName>,
}

pub async fn me(record: TokenRecord) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&ApiResponse::ok(MeResponse {
        email: record.email,
        roles: record.roles,
    })))
}

/// Post-handshake half of admission: the identity is re-derived through the
/// same query extraction the gate used, then the connection runs its course.
pub async fn join_presence(
    socket: warp::ws::WebSocket,
    email: UserEmail,
    query: String,
    presence_hub: Arc<PresenceHub>,
) {
    let token = match access_token_from_query(&query) {
        Ok(token) => token,
        Err(e) => {
            // The gate validated this query; getting here means the two
            // extraction sites diverged.
            error!("post-handshake credential extraction failed: {e}");
            return;
        }
    };
    let (s2c, c2s) = socket.split();
    run_connection(presence_hub, email, token, Box::new(s2c), Box::new(c2s)).await;
}
