use async_trait::async_trait;
use sqlx::error::Error;

use super::QueryResult;
use crate::{
    dao::SubscriptionStore,
    error,
    model::{PushSubscription, Table},
    types::Registration,
};

impl Table<PushSubscription> {
    pub async fn upsert(
        &self,
        registration: &Registration,
        user_agent: Option<String>,
    ) -> Result<PushSubscription, Error> {
        sqlx::query_as(
            r#"
            INSERT INTO push_subscription (user_id, endpoint, p256dh, auth, user_agent)
            VALUES($1, $2, $3, $4, $5)
            ON CONFLICT (endpoint) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                p256dh = EXCLUDED.p256dh,
                auth = EXCLUDED.auth,
                user_agent = EXCLUDED.user_agent,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&registration.user_id)
        .bind(&registration.endpoint)
        .bind(&registration.p256dh)
        .bind(&registration.auth)
        .bind(user_agent)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM push_subscription WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .persistent(true)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn is_exists(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, Error> {
        let (value,): (i64,) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)
            FROM "push_subscription"
            WHERE
                user_id = $1
            AND
                endpoint = $2
            "#,
        )
        .bind(user_id)
        .bind(endpoint)
        .persistent(true)
        .fetch_one(&self.pool)
        .await?;

        Ok(value > 0)
    }

    pub async fn delete(&self, id: i64) -> Result<QueryResult, Error> {
        sqlx::query(
            r#"
            DELETE FROM push_subscription WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
    }

    pub async fn delete_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<QueryResult, Error> {
        sqlx::query(
            r#"
            DELETE FROM push_subscription WHERE endpoint = $1
            "#,
        )
        .bind(endpoint)
        .execute(&self.pool)
        .await
    }
}

#[async_trait]
impl SubscriptionStore for Table<PushSubscription> {
    async fn upsert(
        &self,
        registration: &Registration,
        user_agent: Option<String>,
    ) -> Result<PushSubscription, error::Error> {
        Ok(Table::<PushSubscription>::upsert(self, registration, user_agent).await?)
    }

    async fn get_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, error::Error> {
        Ok(Table::<PushSubscription>::get_by_user(self, user_id).await?)
    }

    async fn is_exists(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, error::Error> {
        Ok(Table::<PushSubscription>::is_exists(self, user_id, endpoint).await?)
    }

    async fn delete(&self, id: i64) -> Result<u64, error::Error> {
        Ok(Table::<PushSubscription>::delete(self, id).await?.rows_affected())
    }

    async fn delete_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<u64, error::Error> {
        Ok(Table::<PushSubscription>::delete_by_endpoint(self, endpoint)
            .await?
            .rows_affected())
    }
}
