use std::{num::NonZeroUsize, sync::Arc};

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    configuration::{AppState, Config, State},
    dao::SubscriptionStore,
    error::Error,
    futures_set::join_all_bounded,
    helpers::endpoint_origin,
    model::PushSubscription,
    provider::HTTP,
    push::{encrypt, VapidSigner},
    types::{NotificationMessage, PushHeader},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stored key material could not be used for encryption.
    Encryption,
    /// The VAPID assertion could not be produced.
    Signing,
    /// Push service unreachable or timed out.
    Transport,
    /// Push service answered with a non-2xx status that does not mean "gone".
    Status,
    /// Push service reported the subscription gone but deleting it failed.
    Cleanup,
    /// The delivery task itself died.
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Delivery {
    Delivered {
        status: u16,
    },
    Removed {
        status: u16,
    },
    Failed {
        kind: FailureKind,
        status: Option<u16>,
        reason: String,
    },
}

impl Delivery {
    fn failed(kind: FailureKind, status: Option<u16>, reason: String) -> Self {
        Delivery::Failed {
            kind,
            status,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub subscription_id: Option<i64>,
    pub origin: String,
    #[serde(flatten)]
    pub delivery: Delivery,
}

impl DeliveryResult {
    fn task_failed(error: JoinError) -> Self {
        DeliveryResult {
            subscription_id: None,
            origin: String::new(),
            delivery: Delivery::failed(
                FailureKind::Task,
                None,
                error.to_string(),
            ),
        }
    }
}

/// Aggregate of one dispatch. `results` is in completion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub removed: usize,
    pub failed: usize,
    pub results: Vec<DeliveryResult>,
}

impl DispatchReport {
    fn record(mut self, result: DeliveryResult) -> Self {
        match result.delivery {
            Delivery::Delivered { .. } => self.delivered += 1,
            Delivery::Removed { .. } => self.removed += 1,
            Delivery::Failed { .. } => self.failed += 1,
        }
        self.results.push(result);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub push_header: PushHeader,
    pub status_code_to_delete: Vec<u16>,
    pub max_tasks: usize,
}

impl From<&Config> for DispatchOptions {
    fn from(config: &Config) -> Self {
        DispatchOptions {
            push_header: config.push_header(),
            status_code_to_delete: config.status_code_to_delete.to_owned(),
            max_tasks: config.max_tasks,
        }
    }
}

/// Fans one notification out to every registered device of a recipient.
///
/// Each subscription is signed, encrypted and posted on its own task; one
/// device failing never affects another. Only a store read failure makes
/// `dispatch` itself return an error.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    http: Arc<HTTP>,
    signer: Arc<VapidSigner>,
    push_header: PushHeader,
    status_code_to_delete: Arc<Vec<u16>>,
    capacity: Option<NonZeroUsize>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        http: Arc<HTTP>,
        signer: Arc<VapidSigner>,
        options: DispatchOptions,
    ) -> Self {
        Dispatcher {
            store,
            http,
            signer,
            push_header: options.push_header,
            status_code_to_delete: Arc::new(options.status_code_to_delete),
            capacity: NonZeroUsize::new(options.max_tasks),
        }
    }

    pub async fn dispatch(
        &self,
        recipient_id: &str,
        notification: &NotificationMessage,
    ) -> Result<DispatchReport, Error> {
        let subscriptions = self.store.get_by_user(recipient_id).await?;

        if subscriptions.is_empty() {
            debug!("No push subscriptions for {}", recipient_id);
            return Ok(DispatchReport::default());
        }

        let payload = Arc::new(notification.to_payload()?);

        let tasks = subscriptions.into_iter().map(|subscription| {
            let dispatcher = self.clone();
            let payload = payload.clone();
            async move { dispatcher.deliver(subscription, &payload).await }
        });

        let report = join_all_bounded(
            tasks,
            self.capacity,
            DispatchReport::default(),
            |report, result| match result {
                Ok(result) => report.record(result),
                Err(e) => {
                    error!("Push delivery task failed: {}", e);
                    report.record(DeliveryResult::task_failed(e))
                },
            },
        )
        .await;

        info!(
            "Dispatch to {}: delivered={} removed={} failed={}",
            recipient_id, report.delivered, report.removed, report.failed
        );

        Ok(report)
    }

    /// Fire-and-forget variant for the message-send path.
    pub fn spawn(
        &self,
        recipient_id: String,
        notification: NotificationMessage,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&recipient_id, &notification).await
            {
                error!("Push dispatch to {} failed: {}", recipient_id, e);
            }
        })
    }

    async fn deliver(
        &self,
        subscription: PushSubscription,
        payload: &[u8],
    ) -> DeliveryResult {
        let origin = endpoint_origin(&subscription.endpoint);
        let delivery = self.attempt(&subscription, payload).await;

        match &delivery {
            Delivery::Delivered { .. } => {},
            Delivery::Removed { status } => info!(
                "Removed subscription {} at {} (status {})",
                subscription.id, origin, status
            ),
            Delivery::Failed { kind, reason, .. } => warn!(
                "Push to subscription {} at {} failed ({:?}): {}",
                subscription.id, origin, kind, reason
            ),
        }

        DeliveryResult {
            subscription_id: Some(subscription.id),
            origin,
            delivery,
        }
    }

    async fn attempt(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Delivery {
        let authorization = match self.signer.sign(&subscription.endpoint) {
            Ok(authorization) => authorization,
            Err(e) => {
                return Delivery::failed(
                    FailureKind::Signing,
                    None,
                    e.to_string(),
                )
            },
        };

        let body = match subscription
            .keys()
            .and_then(|(p256dh, auth)| Ok(encrypt(&p256dh, &auth, payload)?))
        {
            Ok(body) => body,
            Err(e) => {
                return Delivery::failed(
                    FailureKind::Encryption,
                    None,
                    e.to_string(),
                )
            },
        };

        let status = match self
            .http
            .post_push(
                &subscription.endpoint,
                &authorization,
                &self.push_header,
                body,
            )
            .await
        {
            Ok(status) => status,
            Err(e) => {
                return Delivery::failed(
                    FailureKind::Transport,
                    None,
                    e.to_string(),
                )
            },
        };

        if (200..300).contains(&status) {
            return Delivery::Delivered { status };
        }

        if self.status_code_to_delete.contains(&status) {
            return match self.store.delete(subscription.id).await {
                Ok(_) => Delivery::Removed { status },
                Err(e) => Delivery::failed(
                    FailureKind::Cleanup,
                    Some(status),
                    e.to_string(),
                ),
            };
        }

        Delivery::failed(
            FailureKind::Status,
            Some(status),
            format!("push service responded with {}", status),
        )
    }
}

pub async fn send(
    app_state: AppState<State>,
    recipient_id: String,
    notification: NotificationMessage,
) -> Result<DispatchReport, Error> {
    app_state
        .dispatcher
        .dispatch(&recipient_id, &notification)
        .await
}

pub fn spawn_dispatch(
    app_state: AppState<State>,
    recipient_id: String,
    notification: NotificationMessage,
) -> JoinHandle<()> {
    app_state.dispatcher.spawn(recipient_id, notification)
}
