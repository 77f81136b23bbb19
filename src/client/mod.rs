//! Browser-side push flows
//!
//! The browser globals (`navigator.serviceWorker`, `Notification`,
//! `PushManager`, `clients`) sit behind async traits so the capability,
//! registration and service worker logic runs and is tested without a browser.

use thiserror::Error;

pub mod capability;
pub mod registration;
pub mod service_worker;

pub use capability::{
    Capability, Environment, NotificationStatus, PermissionState,
};
pub use registration::{
    BrowserPlatform, BrowserSubscription, HttpRegistrationBackend, PushClient,
    RegistrationBackend,
};
pub use service_worker::{
    DisplayNotification, NotificationOptions, NotificationSurface,
    ServiceWorker,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The platform cannot run Web Push at all. Never retried.
    #[error("{message}")]
    Unsupported {
        capability: Capability,
        message: String,
    },

    /// The user declined or blocked notifications. Only browser settings fix this.
    #[error("Notifications are blocked ({permission}). Allow them for this site in your browser settings.")]
    Permission { permission: PermissionState },

    /// The permission prompt was closed without an answer. Asking again works.
    #[error("Notifications were not enabled. Choose Allow when your browser asks to show notifications.")]
    PermissionDismissed,

    /// Service worker or push subscription setup failed. Retryable.
    #[error("{0}")]
    Registration(String),

    /// Raw failure reported by a browser API.
    #[error("Browser error: {0}")]
    Platform(String),

    /// The server rejected or never received the registration.
    #[error("Could not reach the notification server: {0}")]
    Backend(String),
}

impl ClientError {
    pub fn unsupported(capability: Capability) -> Self {
        ClientError::Unsupported {
            capability,
            message: capability
                .message()
                .unwrap_or("Push notifications are not supported.")
                .to_owned(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::PermissionDismissed
                | ClientError::Registration(_)
                | ClientError::Backend(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::Backend(error.to_string())
    }
}
