use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    dao::SubscriptionStore, error::Error, model::PushSubscription,
    types::Registration,
};

/// Process-local store keyed by endpoint. Used when no database is
/// configured and as the store behind the test suites.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, PushSubscription>>,
    sequence: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, PushSubscription>>, Error> {
        self.rows.lock().map_err(|_| {
            Error::ServerError(String::from("Subscription store lock poisoned"))
        })
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert(
        &self,
        registration: &Registration,
        user_agent: Option<String>,
    ) -> Result<PushSubscription, Error> {
        let mut rows = self.rows()?;
        let now = Utc::now();

        let row = match rows.get_mut(&registration.endpoint) {
            Some(row) => {
                row.user_id = registration.user_id.to_owned();
                row.p256dh = registration.p256dh.to_owned();
                row.auth = registration.auth.to_owned();
                row.user_agent = user_agent;
                row.updated_at = now;
                row.clone()
            },
            None => {
                let row = PushSubscription {
                    id: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                    user_id: registration.user_id.to_owned(),
                    endpoint: registration.endpoint.to_owned(),
                    p256dh: registration.p256dh.to_owned(),
                    auth: registration.auth.to_owned(),
                    user_agent,
                    created_at: now,
                    updated_at: now,
                };
                rows.insert(row.endpoint.to_owned(), row.clone());
                row
            },
        };

        Ok(row)
    }

    async fn get_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, Error> {
        let rows = self.rows()?;
        Ok(rows
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn is_exists(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, Error> {
        let rows = self.rows()?;
        Ok(rows
            .get(endpoint)
            .map(|row| row.user_id == user_id)
            .unwrap_or(false))
    }

    async fn delete(&self, id: i64) -> Result<u64, Error> {
        let mut rows = self.rows()?;
        let before = rows.len();
        rows.retain(|_, row| row.id != id);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<u64, Error> {
        let mut rows = self.rows()?;
        Ok(rows.remove(endpoint).map(|_| 1).unwrap_or(0))
    }
}
