#![allow(dead_code)]

use async_trait::async_trait;
use memory_lane_client::token_store::{save_credentials, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use memory_lane_client::{
    ApiClient, ApiClientConfig, Clock, MemoryTokenStore, PlatformServices, StaticReachability,
    TokenStore,
};
use serde_json::{json, Value};
use memory_lane_client::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use wiremock::MockServer;

/// Sleeps at least this long are treated as request timeouts by [`TestClock`].
const TIMEOUT_SLEEP: Duration = Duration::from_secs(10);

/// Records every sleep. Short sleeps (retry delays) finish at once; long ones
/// (timeouts) never finish unless the clock is `expiring`.
#[derive(Default)]
pub struct TestClock {
    sleeps: Mutex<Vec<Duration>>,
    expiring: bool,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep, including the request timeout, elapses immediately.
    pub fn expiring() -> Self {
        Self {
            expiring: true,
            ..Self::default()
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.sleeps().into_iter().filter(|d| *d < TIMEOUT_SLEEP).collect()
    }
}

#[async_trait]
impl Clock for TestClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if !self.expiring && duration >= TIMEOUT_SLEEP {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
    }
}

/// Memory store with real-time latency on reads and on access-token writes.
///
/// `write_started` is notified whenever an access-token write begins.
#[derive(Clone, Default)]
pub struct SlowTokenStore {
    pub inner: MemoryTokenStore,
    pub read_delay: Duration,
    pub write_delay: Duration,
    pub write_started: Arc<Notify>,
}

#[async_trait]
impl TokenStore for SlowTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key == ACCESS_TOKEN_KEY {
            self.write_started.notify_one();
            tokio::time::sleep(self.write_delay).await;
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}

pub struct Harness {
    pub server: MockServer,
    pub client: Arc<ApiClient>,
    pub store: MemoryTokenStore,
    pub network: StaticReachability,
    pub clock: Arc<TestClock>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::build(TestClock::new(), None).await
    }

    pub async fn with_clock(clock: TestClock) -> Self {
        Self::build(clock, None).await
    }

    /// Client whose persisted store already holds a session.
    pub async fn signed_in(access_token: &str, refresh_token: &str) -> Self {
        Self::build(TestClock::new(), Some((access_token, refresh_token))).await
    }

    async fn build(clock: TestClock, session: Option<(&str, &str)>) -> Self {
        let store = SlowTokenStore::default();
        if let Some((access, refresh)) = session {
            save_credentials(&store.inner, access, Some(refresh))
                .await
                .unwrap();
        }
        let h = Self::with_store(clock, store).await;
        h.client.restore_session().await.unwrap();
        h
    }

    /// Client over `store`, without waiting for the persisted session to load.
    pub async fn with_store(clock: TestClock, store: SlowTokenStore) -> Self {
        let server = MockServer::start().await;
        let network = StaticReachability::online();
        let clock = Arc::new(clock);

        let platform = PlatformServices::new(
            Arc::new(store.clone()),
            Arc::new(network.clone()),
            clock.clone(),
        );
        let client = ApiClient::new(ApiClientConfig::new(api_root(&server)), platform).unwrap();
        let store = store.inner;

        Self {
            server,
            client,
            store,
            network,
            clock,
        }
    }

    pub async fn stored_access_token(&self) -> Option<String> {
        self.store.get(ACCESS_TOKEN_KEY).await.unwrap()
    }

    pub async fn stored_refresh_token(&self) -> Option<String> {
        self.store.get(REFRESH_TOKEN_KEY).await.unwrap()
    }
}

pub fn api_root(server: &MockServer) -> String {
    format!("{}/api", server.uri())
}

pub fn ok(data: Value) -> Value {
    json!({ "success": true, "data": data })
}

pub fn failure(error: &str) -> Value {
    json!({ "success": false, "error": error })
}
