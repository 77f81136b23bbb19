use std::fmt;

use base64::{
    engine::general_purpose::{URL_SAFE_NO_PAD as BASE64_URL, STANDARD_NO_PAD},
    Engine,
};
use url::Url;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Subscribed,
    Unsubscribed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Subscribed => write!(f, "subscribed"),
            Status::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.to_string()
    }
}

/// Browsers hand out keys as unpadded base64url; some polyfills pad them or
/// use the standard alphabet.
pub fn decode_key(value: &str) -> Result<Vec<u8>, Error> {
    let value = value.trim().trim_end_matches('=');

    if value.contains('+') || value.contains('/') {
        return Ok(STANDARD_NO_PAD.decode(value)?);
    }

    Ok(BASE64_URL.decode(value)?)
}

/// Origin of an endpoint for log lines; never log the full capability URL.
pub fn endpoint_origin(endpoint: &str) -> String {
    match Url::parse(endpoint) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => String::from("<invalid endpoint>"),
    }
}

pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect()
}
