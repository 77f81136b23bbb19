//! Client Capability Gate
//!
//! Decides whether Web Push can work in the current browser before anything
//! is registered. Rules are checked top-down and the first match wins.

use std::{fmt, io, str::FromStr};

use serde::{Deserialize, Serialize};

/// Snapshot of the runtime globals the gate inspects (`navigator.userAgent`,
/// `navigator.maxTouchPoints`, `'Notification' in window`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub user_agent: String,
    pub max_touch_points: u32,
    pub has_notification_api: bool,
    pub has_service_worker: bool,
    pub has_push_manager: bool,
}

impl Environment {
    /// iPadOS 13+ reports a desktop Safari user agent; touch support gives it away.
    pub fn is_ios(&self) -> bool {
        let ua = self.user_agent.as_str();

        ua.contains("iPhone")
            || ua.contains("iPad")
            || ua.contains("iPod")
            || (ua.contains("Macintosh") && self.max_touch_points > 1)
    }

    /// Major `Version/NN` of a Safari-family browser, `None` for everything else.
    pub fn safari_version(&self) -> Option<u32> {
        let ua = self.user_agent.as_str();

        if !ua.contains("Safari/")
            || ["Chrome/", "Chromium/", "CriOS/", "FxiOS/", "Edg/", "OPR/"]
                .iter()
                .any(|engine| ua.contains(engine))
        {
            return None;
        }

        let (_, rest) = ua.split_once("Version/")?;
        let major: String =
            rest.chars().take_while(|c| c.is_ascii_digit()).collect();

        major.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Supported,
    UnsupportedIos,
    UnsupportedNoApi,
    UnsupportedNoServiceWorker,
}

impl Capability {
    pub fn detect(environment: &Environment) -> Capability {
        if environment.is_ios() {
            return Capability::UnsupportedIos;
        }

        if !environment.has_notification_api {
            return Capability::UnsupportedNoApi;
        }

        if !environment.has_service_worker || !environment.has_push_manager {
            return Capability::UnsupportedNoServiceWorker;
        }

        Capability::Supported
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported)
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Capability::Supported => None,
            Capability::UnsupportedIos => Some("platform restriction"),
            Capability::UnsupportedNoApi => {
                Some("browser lacks notification support")
            },
            Capability::UnsupportedNoServiceWorker => {
                Some("browser lacks push support")
            },
        }
    }

    /// Sentence shown to the user when push cannot be enabled.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Capability::Supported => None,
            Capability::UnsupportedIos => Some(
                "Push notifications are not available on iPhone and iPad.",
            ),
            Capability::UnsupportedNoApi => {
                Some("This browser does not support notifications.")
            },
            Capability::UnsupportedNoServiceWorker => {
                Some("This browser does not support push notifications.")
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Default,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PermissionState::Default => write!(f, "default"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

impl FromStr for PermissionState {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<PermissionState, Self::Err> {
        match value {
            "default" => Ok(PermissionState::Default),
            "granted" => Ok(PermissionState::Granted),
            "denied" => Ok(PermissionState::Denied),
            _ => Err(io::Error::other("Permission state not supported")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationStatus {
    pub supported: bool,
    pub permission: PermissionState,
    pub subscribed: bool,
}

impl NotificationStatus {
    pub fn unsupported(permission: PermissionState) -> Self {
        NotificationStatus {
            supported: false,
            permission,
            subscribed: false,
        }
    }
}
