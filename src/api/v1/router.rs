use super::authz;
use super::error::*;
use super::handler;
use crate::application_port::TokenService;
use crate::domain_model::{TokenKind, TokenRecord};
use crate::server::{AdmissionGate, PresenceHub, Server};
use std::convert::Infallible;
use std::sync::Arc;
use warp::path::FullPath;
use warp::{Filter, http, reject};

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let issue = warp::post()
        .and(warp::path("token"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.token_service.clone()))
        .and_then(handler::issue_tokens);

    let refresh = warp::post()
        .and(warp::path("refresh"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with(server.token_service.clone()))
        .and_then(handler::refresh);

    let logout = warp::post()
        .and(warp::path("logout"))
        .and(warp::path::end())
        .and(with_authorization(server.token_service.clone()))
        .and(with(server.token_service.clone()))
        .and(with(server.presence_hub.clone()))
        .and_then(handler::logout);

    let me = warp::get()
        .and(warp::path("me"))
        .and(warp::path::end())
        .and(with_authorization(server.token_service.clone()))
        .and_then(handler::me);

    let presence = warp::get()
        .and(warp::path("ws"))
        .and(warp::path::end())
        .and(raw_query())
        .and(warp::ws())
        .and(with(server.admission_gate.clone()))
        .and(with(server.presence_hub.clone()))
        .and_then(
            |query: String,
             ws: warp::ws::Ws,
             gate: Arc<AdmissionGate>,
             hub: Arc<PresenceHub>| async move {
                let email = gate
                    .admit(&query)
                    .await
                    .map_err(ApiErrorCode::from)
                    .map_err(reject::custom)?;
                Ok::<_, warp::Rejection>(ws.on_upgrade(move |socket| {
                    handler::join_presence(socket, email, query, hub)
                }))
            },
        );

    issue.or(refresh).or(logout).or(me).or(presence)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

/// The raw query string, or empty when the request carries none; admission
/// decides what a missing credential means, not the router.
fn raw_query() -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::query::raw()
        .or(warp::any().map(String::new))
        .unify()
}

/// Bearer validation plus the static route/role table: one filter, one check
/// function, no per-handler annotations.
fn with_authorization(
    token_service: Arc<dyn TokenService>,
) -> impl Filter<Extract = (TokenRecord,), Error = warp::Rejection> + Clone {
    warp::path::full()
        .and(warp::header::<String>(http::header::AUTHORIZATION.as_ref()))
        .and_then(move |path: FullPath, header: String| {
            let token_service = token_service.clone();
            async move {
                let token = header
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| reject::custom(ApiErrorCode::Unauthenticated))?;
                let record = token_service
                    .validate(token)
                    .await
                    .map_err(ApiErrorCode::from)
                    .map_err(reject::custom)?;
                if record.kind != TokenKind::Access {
                    return Err(reject::custom(ApiErrorCode::Unauthenticated));
                }
                if !authz::authorize(path.as_str(), &record.roles) {
                    return Err(reject::custom(ApiErrorCode::Forbidden));
                }
                Ok(record)
            }
        })
}
