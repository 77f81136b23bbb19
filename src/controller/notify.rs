use actix_web::{http::header::AUTHORIZATION, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{
    configuration::{AppState, State},
    error::Error,
    handler::send_push::{send, spawn_dispatch},
    types::NotificationMessage,
};

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    recipient_id: String,
    title: String,
    body: String,
    url: Option<String>,
    #[serde(default)]
    background: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub queued: bool,
}

/// Entry point for the message-send flow. With `background` set the dispatch
/// is detached and the caller only learns that it was queued.
#[post("/notify")]
pub async fn notify(
    state: web::Data<AppState<State>>,
    data: web::Json<NotifyRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    authorize(&req, &state.config.auth)?;

    if data.recipient_id.trim().is_empty() {
        return Err(Error::MissingParams(String::from("recipient_id")));
    }

    let notification =
        NotificationMessage::new(&data.title, &data.body, data.url.as_deref());

    if data.background {
        spawn_dispatch(
            state.get_ref().clone(),
            data.recipient_id.to_owned(),
            notification,
        );
        return Ok(HttpResponse::Accepted().json(QueuedResponse { queued: true }));
    }

    let report = send(
        state.get_ref().clone(),
        data.recipient_id.to_owned(),
        notification,
    )
    .await?;

    Ok(HttpResponse::Ok().json(report))
}

fn authorize(req: &HttpRequest, token: &str) -> Result<(), Error> {
    let value = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(Error::Unauthorized)?
        .to_str()?;

    let bearer = value.strip_prefix("Bearer ").ok_or(Error::Unauthorized)?;

    if bool::from(bearer.as_bytes().ct_eq(token.as_bytes())) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}
