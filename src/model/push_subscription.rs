use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::{error::Error, helpers::decode_key};

/// One browser install of one user. `endpoint` is unique across the table.
#[derive(Debug, Clone, FromRow)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PushSubscription {
    /// Decoded `(p256dh, auth)` pair.
    pub fn keys(&self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        Ok((decode_key(&self.p256dh)?, decode_key(&self.auth)?))
    }
}
