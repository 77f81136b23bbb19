//! Push notification types
//!
//! Wire-level types shared by the dispatcher, the HTTP API and the client flows.

use serde::{Deserialize, Serialize};
use std::{fmt, io, str::FromStr};
use url::Url;

use crate::{
    error::Error,
    helpers::decode_key,
    push::encryption::{parse_public_key, AUTH_SECRET_LENGTH},
};

// =============================================================================
// Push Message Types
// =============================================================================

/// Notification content handed to the dispatcher. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl NotificationMessage {
    pub fn new(title: &str, body: &str, url: Option<&str>) -> Self {
        NotificationMessage {
            title: title.to_owned(),
            body: body.to_owned(),
            url: url.unwrap_or("/").to_owned(),
        }
    }

    /// JSON bytes that get encrypted into the push body.
    pub fn to_payload(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct PushHeader {
    pub ttl: u32,
    pub urgency: Urgency,
}

// =============================================================================
// Urgency Enum
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    VeryLow,
    Low,
    Normal,
    High,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Urgency::VeryLow => write!(f, "very-low"),
            Urgency::Low => write!(f, "low"),
            Urgency::Normal => write!(f, "normal"),
            Urgency::High => write!(f, "high"),
        }
    }
}

impl FromStr for Urgency {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Urgency, Self::Err> {
        match value {
            "very-low" => Ok(Urgency::VeryLow),
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            "high" => Ok(Urgency::High),
            _ => Err(io::Error::other("Urgency not supported")),
        }
    }
}

// =============================================================================
// Subscription Types
// =============================================================================

/// Registration payload posted by the browser after `pushManager.subscribe()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

impl Registration {
    /// Rejects key material the encryptor would refuse later, so a bad
    /// registration fails at subscribe time instead of on every dispatch.
    pub fn validate(&self) -> Result<(), Error> {
        if self.user_id.trim().is_empty() {
            return Err(Error::MissingParams(String::from("user_id")));
        }

        let url = Url::parse(&self.endpoint).map_err(|_| {
            Error::InvalidSubscription(String::from("endpoint is not a URL"))
        })?;
        if url.scheme() != "https" || url.host().is_none() {
            return Err(Error::InvalidSubscription(String::from(
                "endpoint must be an https URL",
            )));
        }

        let p256dh = decode_key(&self.p256dh).map_err(|_| {
            Error::InvalidSubscription(String::from("p256dh is not base64url"))
        })?;
        parse_public_key(&p256dh)
            .map_err(|e| Error::InvalidSubscription(e.to_string()))?;

        let auth = decode_key(&self.auth).map_err(|_| {
            Error::InvalidSubscription(String::from("auth is not base64url"))
        })?;
        if auth.len() != AUTH_SECRET_LENGTH {
            return Err(Error::InvalidSubscription(format!(
                "auth must be {} bytes, got {}",
                AUTH_SECRET_LENGTH,
                auth.len()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unregistration {
    pub endpoint: String,
}

// =============================================================================
// JWT Claims
// =============================================================================

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub aud: String,
    pub exp: i64,
    pub sub: String,
}
