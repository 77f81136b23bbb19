use actix_web::{get, web, Responder};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

#[get("/version")]
pub async fn version() -> Result<impl Responder, Error> {
    Ok(web::Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    }))
}
