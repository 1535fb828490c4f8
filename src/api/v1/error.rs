use crate::api::v1::handler::ApiResponse;
use crate::application_port::TokenError;
use crate::server::AdmissionError;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    if let Some(err) = err.find::<ApiErrorCode>() {
        let json = warp::reply::json(&ApiResponse::<()>::err(err.clone(), err.to_string()));
        Ok(warp::reply::with_status(json, err.status()))
    } else {
        let json = warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                code: ApiErrorCode::InternalError,
                message: format!("Unhandled error: {:?}", err),
            }),
        });
        Ok(warp::reply::with_status(
            json,
            StatusCode::INTERNAL_SERVER_ERROR,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Error, Serialize)]
pub enum ApiErrorCode {
    /// One generic outcome for every authentication failure; the distinction
    /// between revoked, expired and malformed stays in the logs.
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Insufficient role")]
    Forbidden,
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Already connected elsewhere")]
    AlreadyConnected,
    #[error("Service temporarily unavailable")]
    StoreUnavailable,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::AlreadyConnected => StatusCode::CONFLICT,
            ApiErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<TokenError> for ApiErrorCode {
    fn from(error: TokenError) -> Self {
        match error {
            // Same outward face, distinct audit lines.
            TokenError::NotFound => {
                warn!("auth failed: token not in store");
                ApiErrorCode::Unauthenticated
            }
            TokenError::Invalid | TokenError::Malformed => {
                warn!("auth failed: token failed verification");
                ApiErrorCode::Unauthenticated
            }
            TokenError::WrongTokenType => ApiErrorCode::InvalidRequest,
            TokenError::StoreUnavailable(e) => {
                warn!("token store unavailable: {e}");
                ApiErrorCode::StoreUnavailable
            }
            TokenError::InternalError(e) => ApiErrorCode::internal(e),
        }
    }
}

impl From<AdmissionError> for ApiErrorCode {
    fn from(error: AdmissionError) -> Self {
        match error {
            AdmissionError::MissingToken | AdmissionError::Malformed => {
                ApiErrorCode::Unauthenticated
            }
            AdmissionError::AlreadyPresent => ApiErrorCode::AlreadyConnected,
        }
    }
}
