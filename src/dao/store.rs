use async_trait::async_trait;

use crate::{error::Error, model::PushSubscription, types::Registration};

/// Persistence seam for push subscriptions.
///
/// `upsert` is keyed on `endpoint`: registering an endpoint again replaces its
/// owner and keys instead of failing. Deletes are idempotent.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn upsert(
        &self,
        registration: &Registration,
        user_agent: Option<String>,
    ) -> Result<PushSubscription, Error>;

    async fn get_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, Error>;

    async fn is_exists(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, Error>;

    async fn delete(&self, id: i64) -> Result<u64, Error>;

    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<u64, Error>;
}
