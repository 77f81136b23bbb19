use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::{
    client::{
        Capability, ClientError, Environment, NotificationStatus,
        PermissionState,
    },
    helpers::{decode_key, endpoint_origin},
    push::encryption::PUBLIC_KEY_LENGTH,
    types::{Registration, Unregistration},
};

pub const SERVICE_WORKER_SCRIPT: &str = "/sw.js";

/// `PushSubscription.toJSON()` flattened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

impl BrowserSubscription {
    pub fn to_registration(&self, user_id: &str) -> Registration {
        Registration {
            user_id: user_id.to_owned(),
            endpoint: self.endpoint.to_owned(),
            p256dh: self.p256dh.to_owned(),
            auth: self.auth.to_owned(),
        }
    }
}

/// The browser APIs the registration flow needs.
#[async_trait]
pub trait BrowserPlatform: Send + Sync {
    fn environment(&self) -> Environment;

    /// `Notification.permission`
    fn permission(&self) -> PermissionState;

    /// `Notification.requestPermission()`
    async fn request_permission(&self) -> Result<PermissionState, ClientError>;

    async fn register_service_worker(
        &self,
        script: &str,
    ) -> Result<(), ClientError>;

    /// Resolves once the registered worker is active (`serviceWorker.ready`).
    async fn wait_until_active(&self) -> Result<(), ClientError>;

    async fn get_subscription(
        &self,
    ) -> Result<Option<BrowserSubscription>, ClientError>;

    /// `pushManager.subscribe({userVisibleOnly: true, applicationServerKey})`
    async fn subscribe(
        &self,
        application_server_key: &[u8],
    ) -> Result<BrowserSubscription, ClientError>;

    async fn unsubscribe(
        &self,
        subscription: &BrowserSubscription,
    ) -> Result<(), ClientError>;
}

/// Server side of the registration flow.
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    async fn save(&self, registration: &Registration) -> Result<(), ClientError>;

    async fn remove(&self, endpoint: &str) -> Result<(), ClientError>;
}

/// Turns a raw browser failure into something a user can act on.
pub fn diagnose(environment: &Environment, error: ClientError) -> ClientError {
    let raw = match error {
        ClientError::Platform(raw) => raw,
        error => return error,
    };

    if let Some(version) = environment.safari_version() {
        if version < 16 {
            return ClientError::Registration(format!(
                "Safari {} does not support web push. Update to Safari 16 or later on macOS 13 (Ventura) or later.",
                version
            ));
        }
    }

    ClientError::Registration(format!(
        "Could not enable notifications ({}). Please try again.",
        raw
    ))
}

/// Drives permission, subscribe, unsubscribe and status checks for one
/// signed-in user on one device.
///
/// Subscribe and unsubscribe are serialized: a second call made while one is
/// in flight waits for it and then runs against the settled state.
pub struct PushClient {
    platform: Arc<dyn BrowserPlatform>,
    backend: Arc<dyn RegistrationBackend>,
    user_id: String,
    application_server_key: Vec<u8>,
    lock: Mutex<()>,
}

impl PushClient {
    pub fn new(
        platform: Arc<dyn BrowserPlatform>,
        backend: Arc<dyn RegistrationBackend>,
        user_id: &str,
        vapid_public_key: &str,
    ) -> Result<Self, ClientError> {
        let application_server_key =
            decode_key(vapid_public_key).map_err(|e| {
                ClientError::Registration(format!(
                    "Invalid application server key: {}",
                    e
                ))
            })?;

        if application_server_key.len() != PUBLIC_KEY_LENGTH {
            return Err(ClientError::Registration(format!(
                "Application server key must be {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                application_server_key.len()
            )));
        }

        Ok(PushClient {
            platform,
            backend,
            user_id: user_id.to_owned(),
            application_server_key,
            lock: Mutex::new(()),
        })
    }

    pub fn capability(&self) -> Capability {
        Capability::detect(&self.platform.environment())
    }

    pub async fn request_permission(
        &self,
    ) -> Result<PermissionState, ClientError> {
        self.ensure_supported()?;
        self.platform.request_permission().await
    }

    pub async fn subscribe(&self) -> Result<BrowserSubscription, ClientError> {
        let _guard = self.lock.lock().await;
        let environment = self.ensure_supported()?;

        let permission = match self.platform.permission() {
            PermissionState::Default => self.platform.request_permission().await?,
            permission => permission,
        };
        match permission {
            PermissionState::Granted => {},
            PermissionState::Default => {
                return Err(ClientError::PermissionDismissed)
            },
            PermissionState::Denied => {
                return Err(ClientError::Permission { permission })
            },
        }

        self.platform
            .register_service_worker(SERVICE_WORKER_SCRIPT)
            .await
            .map_err(|e| diagnose(&environment, e))?;
        self.platform
            .wait_until_active()
            .await
            .map_err(|e| diagnose(&environment, e))?;

        let existing = self
            .platform
            .get_subscription()
            .await
            .map_err(|e| diagnose(&environment, e))?;

        if let Some(existing) = existing {
            self.platform
                .unsubscribe(&existing)
                .await
                .map_err(|e| diagnose(&environment, e))?;

            if let Err(e) = self.backend.remove(&existing.endpoint).await {
                warn!(
                    "Stale subscription at {} left on server: {}",
                    endpoint_origin(&existing.endpoint),
                    e
                );
            }
        }

        let subscription = self
            .platform
            .subscribe(&self.application_server_key)
            .await
            .map_err(|e| diagnose(&environment, e))?;

        let registration = subscription.to_registration(&self.user_id);
        if let Err(e) = self.backend.save(&registration).await {
            if let Err(e) = self.platform.unsubscribe(&subscription).await {
                warn!("Could not roll back local subscription: {}", e);
            }
            return Err(e);
        }

        info!(
            "Subscribed {} at {}",
            self.user_id,
            endpoint_origin(&subscription.endpoint)
        );

        Ok(subscription)
    }

    /// Returns whether a subscription existed. Calling it again is a no-op.
    pub async fn unsubscribe(&self) -> Result<bool, ClientError> {
        let _guard = self.lock.lock().await;

        if !self.platform.environment().has_service_worker {
            return Ok(false);
        }

        let Some(subscription) = self.platform.get_subscription().await? else {
            return Ok(false);
        };

        // Server first: on failure the local subscription stays so a retry
        // can still find the endpoint.
        self.backend.remove(&subscription.endpoint).await?;

        if let Err(e) = self.platform.unsubscribe(&subscription).await {
            warn!("Local unsubscribe failed: {}", e);
        }

        Ok(true)
    }

    pub async fn check_status(&self) -> NotificationStatus {
        match self.capability() {
            Capability::UnsupportedIos | Capability::UnsupportedNoApi => {
                NotificationStatus::unsupported(PermissionState::Denied)
            },
            Capability::UnsupportedNoServiceWorker => {
                NotificationStatus::unsupported(self.platform.permission())
            },
            Capability::Supported => NotificationStatus {
                supported: true,
                permission: self.platform.permission(),
                subscribed: matches!(
                    self.platform.get_subscription().await,
                    Ok(Some(_))
                ),
            },
        }
    }

    fn ensure_supported(&self) -> Result<Environment, ClientError> {
        let environment = self.platform.environment();

        match Capability::detect(&environment) {
            Capability::Supported => Ok(environment),
            capability => Err(ClientError::unsupported(capability)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VapidPublicKey {
    public_key: String,
}

/// Registration backend talking to this service's `/api` endpoints.
#[derive(Debug, Clone)]
pub struct HttpRegistrationBackend {
    http: Client,
    base_url: Url,
}

impl HttpRegistrationBackend {
    pub fn new(
        base_url: &str,
        timeout: Duration,
    ) -> Result<HttpRegistrationBackend, ClientError> {
        let base = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{}/", base_url)
        };
        let base_url =
            Url::parse(&base).map_err(|e| ClientError::Backend(e.to_string()))?;
        let http = Client::builder().timeout(timeout).build()?;

        Ok(HttpRegistrationBackend { http, base_url })
    }

    pub async fn vapid_public_key(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .get(self.url("api/vapid-public-key")?)
            .send()
            .await?
            .error_for_status()?
            .json::<VapidPublicKey>()
            .await?;

        Ok(response.public_key)
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Backend(e.to_string()))
    }
}

#[async_trait]
impl RegistrationBackend for HttpRegistrationBackend {
    async fn save(&self, registration: &Registration) -> Result<(), ClientError> {
        self.http
            .post(self.url("api/subscribe")?)
            .json(registration)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn remove(&self, endpoint: &str) -> Result<(), ClientError> {
        self.http
            .delete(self.url("api/subscribe")?)
            .json(&Unregistration {
                endpoint: endpoint.to_owned(),
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex as StdMutex};

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        client::capability::tests::{browser, CHROME_DESKTOP, IPHONE, SAFARI_15},
        push::{encryption::tests::subscriber, VapidKeys},
    };

    struct FakeState {
        permission: PermissionState,
        subscription: Option<BrowserSubscription>,
        issued: u32,
        prompts: u32,
        registered: u32,
        unsubscribed: Vec<String>,
    }

    struct FakeBrowser {
        environment: Environment,
        prompt_answer: PermissionState,
        subscribe_error: Option<String>,
        state: StdMutex<FakeState>,
    }

    impl FakeBrowser {
        fn new(environment: Environment) -> Self {
            FakeBrowser {
                environment,
                prompt_answer: PermissionState::Granted,
                subscribe_error: None,
                state: StdMutex::new(FakeState {
                    permission: PermissionState::Default,
                    subscription: None,
                    issued: 0,
                    prompts: 0,
                    registered: 0,
                    unsubscribed: vec![],
                }),
            }
        }

        fn with_subscription(self, endpoint: &str) -> Self {
            self.state.lock().unwrap().subscription =
                Some(fake_subscription(endpoint));
            self
        }

        fn current(&self) -> Option<BrowserSubscription> {
            self.state.lock().unwrap().subscription.clone()
        }
    }

    fn fake_subscription(endpoint: &str) -> BrowserSubscription {
        let (_, public, auth) = subscriber();
        BrowserSubscription {
            endpoint: endpoint.to_owned(),
            p256dh: URL_SAFE_NO_PAD.encode(public),
            auth: URL_SAFE_NO_PAD.encode(auth),
        }
    }

    #[async_trait]
    impl BrowserPlatform for FakeBrowser {
        fn environment(&self) -> Environment {
            self.environment.clone()
        }

        fn permission(&self) -> PermissionState {
            self.state.lock().unwrap().permission
        }

        async fn request_permission(
            &self,
        ) -> Result<PermissionState, ClientError> {
            let mut state = self.state.lock().unwrap();
            state.prompts += 1;
            state.permission = self.prompt_answer;
            Ok(self.prompt_answer)
        }

        async fn register_service_worker(
            &self,
            script: &str,
        ) -> Result<(), ClientError> {
            assert_eq!(script, SERVICE_WORKER_SCRIPT);
            self.state.lock().unwrap().registered += 1;
            Ok(())
        }

        async fn wait_until_active(&self) -> Result<(), ClientError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }

        async fn get_subscription(
            &self,
        ) -> Result<Option<BrowserSubscription>, ClientError> {
            Ok(self.current())
        }

        async fn subscribe(
            &self,
            application_server_key: &[u8],
        ) -> Result<BrowserSubscription, ClientError> {
            assert_eq!(application_server_key.len(), PUBLIC_KEY_LENGTH);
            tokio::time::sleep(Duration::from_millis(10)).await;

            if let Some(error) = &self.subscribe_error {
                return Err(ClientError::Platform(error.to_owned()));
            }

            let mut state = self.state.lock().unwrap();
            state.issued += 1;
            let subscription = fake_subscription(&format!(
                "https://push.example.com/sub-{}",
                state.issued
            ));
            state.subscription = Some(subscription.clone());
            Ok(subscription)
        }

        async fn unsubscribe(
            &self,
            subscription: &BrowserSubscription,
        ) -> Result<(), ClientError> {
            let mut state = self.state.lock().unwrap();
            state.unsubscribed.push(subscription.endpoint.to_owned());
            if state.subscription.as_ref() == Some(subscription) {
                state.subscription = None;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        rows: StdMutex<HashMap<String, Registration>>,
        removed: StdMutex<Vec<String>>,
        fail_save: bool,
        failing_removes: StdMutex<u32>,
    }

    #[async_trait]
    impl RegistrationBackend for FakeBackend {
        async fn save(
            &self,
            registration: &Registration,
        ) -> Result<(), ClientError> {
            if self.fail_save {
                return Err(ClientError::Backend(String::from("503")));
            }
            registration
                .validate()
                .map_err(|e| ClientError::Backend(e.to_string()))?;
            self.rows
                .lock()
                .unwrap()
                .insert(registration.endpoint.to_owned(), registration.clone());
            Ok(())
        }

        async fn remove(&self, endpoint: &str) -> Result<(), ClientError> {
            let mut failing = self.failing_removes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ClientError::Backend(String::from("503")));
            }
            self.rows.lock().unwrap().remove(endpoint);
            self.removed.lock().unwrap().push(endpoint.to_owned());
            Ok(())
        }
    }

    fn client(
        browser: Arc<FakeBrowser>,
        backend: Arc<FakeBackend>,
    ) -> PushClient {
        let keys = VapidKeys::generate();
        PushClient::new(browser, backend, "alice", keys.public_key_base64url())
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_registers_with_server() {
        let browser = Arc::new(FakeBrowser::new(browser(CHROME_DESKTOP)));
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend.clone());

        let subscription = client.subscribe().await.unwrap();

        let rows = backend.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&subscription.endpoint].user_id, "alice");

        let state = browser.state.lock().unwrap();
        assert_eq!(state.prompts, 1);
        assert_eq!(state.registered, 1);
        assert_eq!(state.permission, PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_subscribe_replaces_existing_subscription() {
        let old = "https://push.example.com/old";
        let browser = Arc::new(
            FakeBrowser::new(browser(CHROME_DESKTOP)).with_subscription(old),
        );
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend.clone());

        let subscription = client.subscribe().await.unwrap();

        assert_ne!(subscription.endpoint, old);
        assert_eq!(browser.state.lock().unwrap().unsubscribed, vec![old]);
        assert_eq!(*backend.removed.lock().unwrap(), vec![old]);
        assert!(backend
            .rows
            .lock()
            .unwrap()
            .contains_key(&subscription.endpoint));
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_settles_on_one_subscription() {
        let browser = Arc::new(FakeBrowser::new(browser(CHROME_DESKTOP)));
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend.clone());

        let (first, second) = tokio::join!(client.subscribe(), client.subscribe());
        assert!(first.is_ok());
        assert!(second.is_ok());

        let current = browser.current().unwrap();
        let rows = backend.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.contains_key(&current.endpoint));
        assert_eq!(browser.state.lock().unwrap().prompts, 1);
    }

    #[tokio::test]
    async fn test_ios_is_rejected_before_prompting() {
        let browser = Arc::new(FakeBrowser::new(browser(IPHONE)));
        browser.state.lock().unwrap().permission = PermissionState::Granted;
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend);

        let error = client.request_permission().await.unwrap_err();
        assert!(matches!(
            error,
            ClientError::Unsupported {
                capability: Capability::UnsupportedIos,
                ..
            }
        ));
        assert!(!error.is_retryable());
        assert_eq!(browser.state.lock().unwrap().prompts, 0);

        assert_eq!(
            client.check_status().await,
            NotificationStatus {
                supported: false,
                permission: PermissionState::Denied,
                subscribed: false,
            }
        );
    }

    #[tokio::test]
    async fn test_denied_permission_is_a_permission_error() {
        let mut fake = FakeBrowser::new(browser(CHROME_DESKTOP));
        fake.prompt_answer = PermissionState::Denied;
        let browser = Arc::new(fake);
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend.clone());

        assert_eq!(
            client.subscribe().await.unwrap_err(),
            ClientError::Permission {
                permission: PermissionState::Denied
            }
        );
        assert!(browser.current().is_none());
        assert!(backend.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dismissed_prompt_asks_again() {
        let mut fake = FakeBrowser::new(browser(CHROME_DESKTOP));
        fake.prompt_answer = PermissionState::Default;
        let browser = Arc::new(fake);
        let client =
            client(browser.clone(), Arc::new(FakeBackend::default()));

        let error = client.subscribe().await.unwrap_err();

        assert_eq!(error, ClientError::PermissionDismissed);
        assert!(error.is_retryable());
        assert!(!error.to_string().contains("blocked"));
        assert!(browser.current().is_none());
    }

    #[tokio::test]
    async fn test_old_safari_failure_is_diagnosed() {
        let mut fake = FakeBrowser::new(browser(SAFARI_15));
        fake.subscribe_error = Some(String::from("AbortError"));
        let client =
            client(Arc::new(fake), Arc::new(FakeBackend::default()));

        let error = client.subscribe().await.unwrap_err();
        let message = error.to_string();

        assert!(error.is_retryable());
        assert!(message.contains("Safari 16"));
        assert!(message.contains("macOS 13"));
        assert!(!message.contains("AbortError"));
    }

    #[tokio::test]
    async fn test_backend_failure_rolls_back_local_subscription() {
        let browser = Arc::new(FakeBrowser::new(browser(CHROME_DESKTOP)));
        let backend = Arc::new(FakeBackend {
            fail_save: true,
            ..Default::default()
        });
        let client = client(browser.clone(), backend);

        assert!(matches!(
            client.subscribe().await,
            Err(ClientError::Backend(_))
        ));
        assert!(browser.current().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let browser = Arc::new(FakeBrowser::new(browser(CHROME_DESKTOP)));
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend.clone());

        client.subscribe().await.unwrap();
        assert!(client.check_status().await.subscribed);

        assert!(client.unsubscribe().await.unwrap());
        assert!(!client.unsubscribe().await.unwrap());

        assert!(browser.current().is_none());
        assert!(backend.rows.lock().unwrap().is_empty());
        assert_eq!(
            client.check_status().await,
            NotificationStatus {
                supported: true,
                permission: PermissionState::Granted,
                subscribed: false,
            }
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_retries_after_server_failure() {
        let browser = Arc::new(FakeBrowser::new(browser(CHROME_DESKTOP)));
        let backend = Arc::new(FakeBackend::default());
        let client = client(browser.clone(), backend.clone());

        let subscription = client.subscribe().await.unwrap();
        *backend.failing_removes.lock().unwrap() = 1;

        assert!(matches!(
            client.unsubscribe().await,
            Err(ClientError::Backend(_))
        ));
        assert_eq!(browser.current(), Some(subscription.clone()));
        assert!(backend
            .rows
            .lock()
            .unwrap()
            .contains_key(&subscription.endpoint));

        assert!(client.unsubscribe().await.unwrap());
        assert!(browser.current().is_none());
        assert!(backend.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_server_key() {
        let result = PushClient::new(
            Arc::new(FakeBrowser::new(browser(CHROME_DESKTOP))),
            Arc::new(FakeBackend::default()),
            "alice",
            "AQID",
        );

        assert!(matches!(result, Err(ClientError::Registration(_))));
    }

    #[tokio::test]
    async fn test_http_backend() {
        let server = MockServer::start().await;
        let registration = fake_subscription("https://push.example.com/http")
            .to_registration("alice");

        Mock::given(method("POST"))
            .and(path("/api/subscribe"))
            .and(body_json(&registration))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/subscribe"))
            .and(body_json(serde_json::json!({
                "endpoint": "https://push.example.com/http"
            })))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/vapid-public-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "public_key": "BPk" })),
            )
            .mount(&server)
            .await;

        let backend =
            HttpRegistrationBackend::new(&server.uri(), Duration::from_secs(5))
                .unwrap();

        backend.save(&registration).await.unwrap();
        assert!(matches!(
            backend.remove(&registration.endpoint).await,
            Err(ClientError::Backend(_))
        ));
        assert_eq!(backend.vapid_public_key().await.unwrap(), "BPk");
    }
}
