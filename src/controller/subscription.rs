//! Subscription API endpoints
//!
//! Browser registration, removal and presence checks, plus the VAPID public
//! key the client needs as `applicationServerKey`.

use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    configuration::{AppState, State},
    error::Error,
    helpers::{endpoint_origin, Status},
    types::{Registration, Unregistration},
};

// =============================================================================
// Subscribe
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub status: String,
    pub id: i64,
}

#[post("/subscribe")]
pub async fn subscribe(
    state: web::Data<AppState<State>>,
    registration: web::Json<Registration>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    registration.validate()?;

    let user_agent = if let Some(item) = req.headers().get("user-agent") {
        Some(item.to_str()?.to_string())
    } else {
        None
    };

    let row = state.database.upsert(&registration, user_agent).await?;

    info!(
        "Registered subscription {} for {} at {}",
        row.id,
        row.user_id,
        endpoint_origin(&row.endpoint)
    );

    Ok(HttpResponse::Ok().json(SubscribeResponse {
        status: String::from(Status::Subscribed),
        id: row.id,
    }))
}

// =============================================================================
// Unsubscribe
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct UnsubscribeResponse {
    pub status: String,
    pub removed: u64,
}

#[delete("/subscribe")]
pub async fn unsubscribe(
    state: web::Data<AppState<State>>,
    data: web::Json<Unregistration>,
) -> Result<impl Responder, Error> {
    if data.endpoint.trim().is_empty() {
        return Err(Error::MissingParams(String::from("endpoint")));
    }

    let removed = state.database.delete_by_endpoint(&data.endpoint).await?;

    Ok(web::Json(UnsubscribeResponse {
        status: String::from(Status::Unsubscribed),
        removed,
    }))
}

// =============================================================================
// Subscription Status
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubscriptionQuery {
    user_id: String,
    endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub result: bool,
}

#[get("/subscribe")]
pub async fn is_subscribed(
    state: web::Data<AppState<State>>,
    query: web::Query<SubscriptionQuery>,
) -> Result<impl Responder, Error> {
    let result = state
        .database
        .is_exists(&query.user_id, &query.endpoint)
        .await?;

    Ok(web::Json(SubscriptionResponse { result }))
}

// =============================================================================
// VAPID Public Key
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct VapidPublicKeyResponse {
    pub public_key: String,
}

#[get("/vapid-public-key")]
pub async fn vapid_public_key(
    state: web::Data<AppState<State>>,
) -> Result<impl Responder, Error> {
    Ok(web::Json(VapidPublicKeyResponse {
        public_key: state.signer.keys().public_key_base64url().to_owned(),
    }))
}
