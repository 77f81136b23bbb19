use actix_web::{
    http::{header::ToStrError as HEADER_TO_STR_ERROR, StatusCode},
    ResponseError,
};
use base64::DecodeError as BASE64_DECODE_ERROR;
use jsonwebtoken::errors::Error as JWT_ERROR;
use reqwest::header::InvalidHeaderValue as INVALID_HEADER_VALUE;
use reqwest::Error as REQWEST_ERROR;
use serde_json::Error as JSON_ERROR;
use sqlx::error::Error as SQL_ERROR;
use std::{env::VarError, io::Error as IO_ERROR, num::ParseIntError};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;
use url::ParseError as URL_ERROR;

use crate::push::EncryptionError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    URL(#[from] URL_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    SQL(#[from] SQL_ERROR),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("{0}")]
    Base64DecodeError(#[from] BASE64_DECODE_ERROR),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("{0}")]
    JsonError(#[from] JSON_ERROR),

    #[error("Server end with error: {0}")]
    ServerError(String),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("{0}")]
    HeaderToStrError(#[from] HEADER_TO_STR_ERROR),

    #[error("{0}")]
    ReqwestError(#[from] REQWEST_ERROR),

    #[error("{0}")]
    InvalidHeaderValue(#[from] INVALID_HEADER_VALUE),

    #[error("Invalid option {option}")]
    InvalidOption { option: String },

    #[error("{0}")]
    JWT(#[from] JWT_ERROR),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("VAPID error: {0}")]
    Vapid(String),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Missing params: {0}")]
    MissingParams(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidSubscription(_)
            | Error::MissingParams(_)
            | Error::InvalidOption { .. }
            | Error::JsonError(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
