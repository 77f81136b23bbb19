//! Service Worker Notification Handler
//!
//! Turns a decrypted push event into a system notification and handles the
//! click that follows. A malformed payload still produces a notification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::ClientError;

pub const DEFAULT_TITLE: &str = "New Message";
pub const DEFAULT_BODY: &str = "You have a new message";
pub const DEFAULT_URL: &str = "/";
/// Successive pushes replace each other instead of stacking.
pub const NOTIFICATION_TAG: &str = "message-notification";
pub const ICON: &str = "/icon-192.png";
pub const BADGE: &str = "/badge-72.png";
pub const VIBRATE: [u32; 3] = [200, 100, 200];

#[derive(Debug, Default)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
}

impl PushPayload {
    /// Reads each field on its own so one bad field keeps the others.
    fn parse(bytes: &[u8]) -> PushPayload {
        let value = match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!("Malformed push payload: {}", e);
                return PushPayload::default();
            },
        };

        let field = |name: &str| match value.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.to_owned()),
            Some(other) => {
                warn!("Ignoring push payload field {}: {}", name, other);
                None
            },
        };

        PushPayload {
            title: field("title"),
            body: field("body"),
            url: field("url"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// Second argument of `registration.showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayNotification {
    pub title: String,
    pub options: NotificationOptions,
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

impl DisplayNotification {
    pub fn from_push_data(data: Option<&[u8]>) -> DisplayNotification {
        let payload = match data {
            Some(bytes) => PushPayload::parse(bytes),
            None => PushPayload::default(),
        };

        DisplayNotification {
            title: or_default(payload.title, DEFAULT_TITLE),
            options: NotificationOptions {
                body: or_default(payload.body, DEFAULT_BODY),
                icon: ICON.to_owned(),
                badge: BADGE.to_owned(),
                vibrate: VIBRATE.to_vec(),
                tag: NOTIFICATION_TAG.to_owned(),
                require_interaction: false,
                data: NotificationData {
                    url: or_default(payload.url, DEFAULT_URL),
                },
            },
        }
    }
}

/// What the worker can do to the outside world (`registration` and `clients`).
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<(), ClientError>;

    async fn close_notification(&self, tag: &str);

    /// Focuses a window already showing `url`, otherwise opens one.
    async fn open_or_focus(&self, url: &str) -> Result<(), ClientError>;
}

pub struct ServiceWorker<S> {
    surface: S,
}

impl<S: NotificationSurface> ServiceWorker<S> {
    pub fn new(surface: S) -> Self {
        ServiceWorker { surface }
    }

    pub async fn on_push(
        &self,
        data: Option<&[u8]>,
    ) -> Result<DisplayNotification, ClientError> {
        let notification = DisplayNotification::from_push_data(data);

        self.surface
            .show_notification(&notification.title, &notification.options)
            .await?;

        Ok(notification)
    }

    pub async fn on_notification_click(
        &self,
        options: &NotificationOptions,
    ) -> Result<(), ClientError> {
        self.surface.close_notification(&options.tag).await;

        let url = if options.data.url.is_empty() {
            DEFAULT_URL
        } else {
            options.data.url.as_str()
        };

        self.surface.open_or_focus(url).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSurface for Recorder {
        async fn show_notification(
            &self,
            title: &str,
            options: &NotificationOptions,
        ) -> Result<(), ClientError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("show {} [{}]", title, options.tag));
            Ok(())
        }

        async fn close_notification(&self, tag: &str) {
            self.events.lock().unwrap().push(format!("close {}", tag));
        }

        async fn open_or_focus(&self, url: &str) -> Result<(), ClientError> {
            self.events.lock().unwrap().push(format!("open {}", url));
            Ok(())
        }
    }

    #[test]
    fn test_payload_fields_are_used() {
        let notification = DisplayNotification::from_push_data(Some(
            br#"{"title":"Alice","body":"Hi!","url":"/chat"}"#,
        ));

        assert_eq!(notification.title, "Alice");
        assert_eq!(notification.options.body, "Hi!");
        assert_eq!(notification.options.data.url, "/chat");
        assert_eq!(notification.options.tag, NOTIFICATION_TAG);
        assert_eq!(notification.options.vibrate, vec![200, 100, 200]);
    }

    #[test]
    fn test_missing_and_malformed_payloads_fall_back() {
        for data in [
            None,
            Some(&b"not json"[..]),
            Some(&b"{}"[..]),
            Some(&br#"{"title":""}"#[..]),
        ] {
            let notification = DisplayNotification::from_push_data(data);
            assert_eq!(notification.title, DEFAULT_TITLE);
            assert_eq!(notification.options.body, DEFAULT_BODY);
            assert_eq!(notification.options.data.url, DEFAULT_URL);
        }
    }

    #[test]
    fn test_mistyped_field_keeps_valid_fields() {
        let notification = DisplayNotification::from_push_data(Some(
            br#"{"title":"A","body":5,"url":"/chat"}"#,
        ));

        assert_eq!(notification.title, "A");
        assert_eq!(notification.options.body, DEFAULT_BODY);
        assert_eq!(notification.options.data.url, "/chat");

        let notification =
            DisplayNotification::from_push_data(Some(br#"["title"]"#));
        assert_eq!(notification.title, DEFAULT_TITLE);
    }

    #[test]
    fn test_options_match_show_notification_shape() {
        let options = DisplayNotification::from_push_data(None).options;
        let json = serde_json::to_value(&options).unwrap();

        assert_eq!(json["icon"], ICON);
        assert_eq!(json["badge"], BADGE);
        assert_eq!(json["requireInteraction"], false);
        assert_eq!(json["data"]["url"], "/");
    }

    #[tokio::test]
    async fn test_push_then_click() {
        let worker = ServiceWorker::new(Recorder::default());

        let notification = worker
            .on_push(Some(br#"{"title":"Bob","url":"/chat/42"}"#))
            .await
            .unwrap();
        worker
            .on_notification_click(&notification.options)
            .await
            .unwrap();

        assert_eq!(
            *worker.surface.events.lock().unwrap(),
            vec![
                "show Bob [message-notification]",
                "close message-notification",
                "open /chat/42",
            ]
        );
    }
}
