use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_ENCODING,
        CONTENT_TYPE, USER_AGENT,
    },
    Client,
};
use std::time::Duration;

use crate::{
    configuration::Config,
    error::Error,
    push::{VapidAuthorization, CONTENT_ENCODING as AES128GCM},
    types::PushHeader,
};

const CRYPTO_KEY: HeaderName = HeaderName::from_static("crypto-key");
const TTL: HeaderName = HeaderName::from_static("ttl");
const URGENCY: HeaderName = HeaderName::from_static("urgency");

/// Outbound transport to browser push services.
#[derive(Debug, Clone)]
pub struct HTTP {
    pub http: Client,
}

impl HTTP {
    pub fn new(config: &Config) -> Result<HTTP, Error> {
        Self::with_timeout(Duration::from_secs(config.timeout))
    }

    pub fn with_timeout(timeout: Duration) -> Result<HTTP, Error> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(HTTP { http })
    }

    /// POSTs one encrypted message and returns the push service status code.
    pub async fn post_push(
        &self,
        endpoint: &str,
        authorization: &VapidAuthorization,
        push_header: &PushHeader,
        body: Vec<u8>,
    ) -> Result<u16, Error> {
        let mut header_map = HeaderMap::new();

        header_map.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        header_map.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization.authorization())?,
        );
        header_map.insert(
            CRYPTO_KEY,
            HeaderValue::from_str(&authorization.crypto_key())?,
        );
        header_map
            .insert(CONTENT_ENCODING, HeaderValue::from_static(AES128GCM));
        header_map.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        header_map.insert(TTL, HeaderValue::from(push_header.ttl));
        header_map.insert(
            URGENCY,
            HeaderValue::from_str(&push_header.urgency.to_string())?,
        );

        let response = self
            .http
            .post(endpoint)
            .headers(header_map)
            .body(body)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
