//! Authenticated API client with token refresh and retry handling

use crate::config::ApiClientConfig;
use crate::endpoints;
use crate::error::{ClientError, Result, SESSION_EXPIRED};
use crate::platform::PlatformServices;
use crate::request::{ApiRequest, MultipartBody};
use crate::session::{AuthState, RefreshStart, Session};
use crate::token_store::{clear_credentials, load_credentials, save_credentials};
use crate::types::*;
use async_singleflight::Group;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Singleflight key; there is one refresh token per client.
const REFRESH_KEY: &str = "refresh";

pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 0.5;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Client for the Memory Lane REST API
///
/// Every call goes through the same pipeline: reachability check, headers,
/// timed send, response classification, 401 refresh-and-replay, bounded retry
/// of transient failures.
pub struct ApiClient {
    config: ApiClientConfig,
    base_url: RwLock<String>,
    http_client: Client,
    platform: PlatformServices,
    session: Session,
    /// Concurrent 401s share a single refresh round-trip; errors are
    /// stringified since every waiter receives a clone
    refresh_singleflight: Group<String, String>,
    /// Serializes token-store writes so a stale write cannot land after a newer one
    storage_lock: Mutex<()>,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// When called inside a tokio runtime, persisted tokens are loaded in the
    /// background; until then requests go out unauthenticated. Call
    /// [`ApiClient::restore_session`] to wait for them instead.
    pub fn new(config: ApiClientConfig, platform: PlatformServices) -> Result<Arc<Self>> {
        config.validate()?;

        let http_client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        let client = Arc::new(Self {
            base_url: RwLock::new(config.base_url.clone()),
            config,
            http_client,
            platform,
            session: Session::new(),
            refresh_singleflight: Group::new(),
            storage_lock: Mutex::new(()),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client_ref = Arc::clone(&client);
            handle.spawn(async move {
                if let Err(e) = client_ref.restore_session().await {
                    warn!(error = %e, "Failed to load persisted tokens");
                }
            });
        }

        Ok(client)
    }

    /// Load persisted tokens into the session.
    ///
    /// Has no effect if a login, logout or expiry happened meanwhile.
    pub async fn restore_session(&self) -> Result<AuthState> {
        let generation = self.session.generation();
        match load_credentials(self.platform.token_store.as_ref()).await? {
            Some(credentials) => {
                if self.session.restore(credentials, generation) {
                    info!("Restored persisted session");
                }
            }
            None => debug!("No persisted session"),
        }
        Ok(self.session.state())
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> String {
        self.base_url.read().clone()
    }

    pub fn set_base_url(&self, url: impl Into<String>) {
        *self.base_url.write() = url.into();
    }

    /// Current access token, if any. During a refresh this is the stale one.
    pub fn access_token(&self) -> Option<String> {
        self.session.access_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.access_token().is_some()
    }

    pub fn auth_state(&self) -> AuthState {
        self.session.state()
    }

    /// `Expired -> Unauthenticated`, once the caller has sent the user to login.
    pub fn acknowledge_expired(&self) -> bool {
        self.session.acknowledge_expired()
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url.read().trim_end_matches('/'), endpoint)
    }
}

// Request pipeline
impl ApiClient {
    /// Perform `request` and deserialize the envelope's `data` (or the whole
    /// envelope when it has none) into `T`.
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let value = self.request_value(&request).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn request_discarding(&self, request: ApiRequest) -> Result<()> {
        self.request_value(&request).await.map(drop)
    }

    /// Generic retry loop around [`ApiClient::attempt`].
    ///
    /// Independent of the 401 replay budget inside an attempt.
    #[instrument(skip(self, request), fields(method = %request.method, endpoint = %request.endpoint))]
    async fn request_value(&self, request: &ApiRequest) -> Result<Value> {
        let max_retries = self.config.max_retries;
        let mut retries = 0;

        loop {
            match self.attempt(request).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < max_retries => {
                    retries += 1;
                    warn!(
                        retry = retries,
                        max_retries,
                        error = %e,
                        "Request failed, retrying"
                    );
                    self.platform.clock.sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    debug!(error = %e, retries, "Request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<Value> {
        if !self.platform.reachability.is_reachable().await {
            return Err(ClientError::offline());
        }

        let mut replays = 0;
        loop {
            let access_token = self.session.access_token();
            let (status, body) = self.send_once(request, access_token.as_deref()).await?;

            if status == StatusCode::UNAUTHORIZED && request.refresh_on_unauthorized {
                if replays >= self.config.max_retries {
                    warn!(replays, "Still unauthorized after refreshing, ending session");
                    self.end_session().await;
                    return Err(ClientError::Authentication(SESSION_EXPIRED.to_string()));
                }
                if !self.recover_from_unauthorized(access_token.as_deref()).await {
                    let message = server_message(&body).unwrap_or_else(|| SESSION_EXPIRED.to_string());
                    return Err(ClientError::Authentication(message));
                }
                replays += 1;
                debug!(replays, "Replaying request with refreshed token");
                continue;
            }

            if !status.is_success() {
                return Err(ClientError::from_status(status, server_message(&body)));
            }

            return Ok(unwrap_data(body));
        }
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), self.url_for(&request.endpoint));
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        let builder = request.apply(builder)?;

        debug!(authenticated = access_token.is_some(), "Sending request");

        let (status, body) = self
            .with_timeout(async move { read_json(builder.send().await?).await })
            .await?;

        debug!(status = %status, "Received response");
        Ok((status, body))
    }

    /// Race `fut` against the configured timeout on the injected clock.
    ///
    /// Losing the race drops `fut`, which aborts the in-flight HTTP call.
    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            result = fut => result,
            _ = self.platform.clock.sleep(timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Decide whether a 401 can be fixed by replaying.
    async fn recover_from_unauthorized(&self, sent_with: Option<&str>) -> bool {
        if self.session.token_replaced(sent_with) {
            debug!("Access token changed while request was in flight");
            return true;
        }
        self.refresh_deduplicated(sent_with).await
    }
}

/// Status and JSON body of a response.
///
/// Empty bodies read as `null`. A non-JSON body on a 2xx is a protocol
/// violation; on other statuses it is ignored and the status decides.
async fn read_json(response: Response) -> Result<(StatusCode, Value)> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?;

    if bytes.is_empty() {
        return Ok((status, Value::Null));
    }
    if !content_type.as_deref().is_some_and(is_json_content_type) {
        if status.is_success() {
            return Err(ClientError::Protocol {
                status,
                content_type,
            });
        }
        return Ok((status, Value::Null));
    }
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

// Session lifecycle
impl ApiClient {
    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers share one round-trip. Any failure ends the session
    /// (memory and persisted storage) and yields `false`.
    pub async fn refresh_access_token(&self) -> bool {
        self.refresh_deduplicated(None).await
    }

    async fn refresh_deduplicated(&self, stale: Option<&str>) -> bool {
        let (token, error, shared) = self
            .refresh_singleflight
            .work(REFRESH_KEY, self.do_refresh(stale))
            .await;

        match (token, error) {
            (Some(_), None) => {
                debug!(shared, "Token refresh completed");
                true
            }
            (_, error) => {
                debug!(shared, error = ?error, "Token refresh did not produce a token");
                false
            }
        }
    }

    /// `stale` is the access token a 401 was received for; if it has been
    /// replaced already, the current token is reused without a round-trip.
    async fn do_refresh(&self, stale: Option<&str>) -> std::result::Result<String, String> {
        if stale.is_some() && self.session.token_replaced(stale) {
            if let Some(current) = self.session.access_token() {
                debug!("Access token already refreshed");
                return Ok(current);
            }
        }

        let refresh_token = match self.session.begin_refresh() {
            RefreshStart::Begin(token) => token,
            RefreshStart::Revoked => {
                warn!("Session has no refresh token, ending it");
                self.clear_persisted(self.session.generation()).await;
                return Err("No refresh token available".to_string());
            }
            // Persisted tokens may not be loaded yet; leave them alone.
            RefreshStart::NoSession => {
                debug!("No session to refresh");
                return Err("No refresh token available".to_string());
            }
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(access_token) => {
                let Some(generation) = self.session.finish_refresh(access_token.clone()) else {
                    return Err("Session ended while refreshing".to_string());
                };
                self.persist(generation, &access_token, None).await;
                info!("Access token refreshed successfully");
                Ok(access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.end_session().await;
                Err(e.to_string())
            }
        }
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<String> {
        let builder = self
            .http_client
            .post(self.url_for(endpoints::auth::REFRESH))
            .bearer_auth(refresh_token)
            .header(CONTENT_TYPE, crate::request::APPLICATION_JSON);

        let (status, body) = self
            .with_timeout(async move { read_json(builder.send().await?).await })
            .await?;

        if !status.is_success() {
            return Err(ClientError::from_status(status, server_message(&body)));
        }

        let tokens: TokenResponse = serde_json::from_value(unwrap_data(body))?;
        Ok(tokens.access_token)
    }

    async fn start_session(&self, auth: &AuthResponse) {
        let generation = self.session.install(auth.credentials());
        self.persist(generation, &auth.access_token, Some(&auth.refresh_token))
            .await;
    }

    /// Save tokens issued in session `generation`. Skipped if the session
    /// has moved on (logout, expiry, another login) since.
    async fn persist(&self, generation: u64, access_token: &str, refresh_token: Option<&str>) {
        let _guard = self.storage_lock.lock().await;
        if self.session.generation() != generation {
            debug!("Session changed, not persisting tokens");
            return;
        }
        let store = self.platform.token_store.as_ref();
        if let Err(e) = save_credentials(store, access_token, refresh_token).await {
            warn!(error = %e, "Failed to persist tokens");
        }
    }

    /// Drop the session after an unrecoverable auth failure.
    async fn end_session(&self) {
        if let Some(generation) = self.session.expire() {
            self.clear_persisted(generation).await;
        }
    }

    async fn clear_persisted(&self, generation: u64) {
        let _guard = self.storage_lock.lock().await;
        if self.session.generation() != generation {
            debug!("Session changed, not clearing persisted tokens");
            return;
        }
        if let Err(e) = clear_credentials(self.platform.token_store.as_ref()).await {
            warn!(error = %e, "Failed to clear persisted tokens");
        }
    }

    /// Log in and start a session
    ///
    /// # Arguments
    /// * `credentials` - Username or email plus password
    ///
    /// Both tokens are persisted. A rejection by the server (bad password,
    /// unknown user) is returned as [`ClientError::Authentication`] with the
    /// server's message; the current session is left untouched.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<AuthResponse> {
        let request = ApiRequest::post(endpoints::auth::LOGIN)
            .json(credentials)?
            .without_refresh();
        let auth: AuthResponse = self.request(request).await.map_err(rejected)?;

        self.start_session(&auth).await;
        info!(username = %auth.user.username, "Logged in");
        Ok(auth)
    }

    /// Create an account and start a session, like [`ApiClient::login`]
    ///
    /// Field validation (username, email, password policy) is left to the
    /// server; its message is passed through on rejection.
    pub async fn register(&self, user: &RegisterRequest) -> Result<AuthResponse> {
        let request = ApiRequest::post(endpoints::auth::REGISTER)
            .json(user)?
            .without_refresh();
        let auth: AuthResponse = self.request(request).await.map_err(rejected)?;

        self.start_session(&auth).await;
        info!(username = %auth.user.username, "Registered");
        Ok(auth)
    }

    /// End the session. The server call is best effort; local and persisted
    /// tokens are always cleared.
    pub async fn logout(&self) {
        // A session still loading from storage is logged out on the server too.
        if let Err(e) = self.restore_session().await {
            warn!(error = %e, "Failed to load persisted tokens before logout");
        }

        if self.session.access_token().is_some() {
            let request = ApiRequest::post(endpoints::auth::LOGOUT).without_refresh();
            if let Err(e) = self.request_discarding(request).await {
                warn!(error = %e, "Server-side logout failed");
            }
        } else {
            debug!("No active session, skipping server logout");
        }

        let generation = self.session.logout();
        self.clear_persisted(generation).await;
        info!("Logged out");
    }

    /// Cheap check that the current session is accepted by the server.
    pub async fn verify_token(&self) -> bool {
        match self
            .request_discarding(ApiRequest::get(endpoints::auth::VERIFY_TOKEN))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Token verification failed");
                false
            }
        }
    }

    /// Whether `username` is still free
    pub async fn check_username(&self, username: &str) -> Result<Availability> {
        let request = ApiRequest::post(endpoints::auth::CHECK_USERNAME)
            .json(&json!({ "username": username }))?;
        self.request(request).await
    }

    /// Whether `email` is still free
    pub async fn check_email(&self, email: &str) -> Result<Availability> {
        let request =
            ApiRequest::post(endpoints::auth::CHECK_EMAIL).json(&json!({ "email": email }))?;
        self.request(request).await
    }
}

/// Login and registration failures are reported as authentication errors,
/// keeping the server's explanation ("username taken", "bad password", ...).
fn rejected(err: ClientError) -> ClientError {
    match err {
        ClientError::Api { message, .. } => ClientError::Authentication(message),
        other => other,
    }
}

// Users
impl ApiClient {
    /// Profile of the logged-in user
    pub async fn user_profile<T: DeserializeOwned>(&self) -> Result<T> {
        self.request(ApiRequest::get(endpoints::users::PROFILE)).await
    }

    /// Update the logged-in user's profile
    ///
    /// # Arguments
    /// * `changes` - Any serializable object holding the fields to change
    pub async fn update_user_profile<T, B>(&self, changes: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(ApiRequest::put(endpoints::users::PROFILE).json(changes)?)
            .await
    }

    /// Replace the avatar; `form` carries the image as a file part.
    pub async fn upload_avatar<T: DeserializeOwned>(&self, form: MultipartBody) -> Result<T> {
        self.request(ApiRequest::post(endpoints::users::AVATAR).multipart(form))
            .await
    }

    /// Public profile of another user
    pub async fn user<T: DeserializeOwned>(&self, user_id: &str) -> Result<T> {
        self.request(ApiRequest::get(endpoints::users::user(user_id)))
            .await
    }
}

// Memories
impl ApiClient {
    /// Create a memory
    ///
    /// # Arguments
    /// * `memory` - Title, content type and location, plus optional text or media URL
    pub async fn create_memory<T: DeserializeOwned>(&self, memory: &CreateMemoryRequest) -> Result<T> {
        self.request(ApiRequest::post(endpoints::memories::CREATE).json(memory)?)
            .await
    }

    /// Fetch a single memory by id
    pub async fn memory<T: DeserializeOwned>(&self, memory_id: &str) -> Result<T> {
        self.request(ApiRequest::get(endpoints::memories::memory(memory_id)))
            .await
    }

    /// Partial update; fields left `None` are not sent.
    pub async fn update_memory<T: DeserializeOwned>(
        &self,
        memory_id: &str,
        updates: &UpdateMemoryRequest,
    ) -> Result<T> {
        self.request(ApiRequest::put(endpoints::memories::memory(memory_id)).json(updates)?)
            .await
    }

    /// Delete a memory owned by the logged-in user
    pub async fn delete_memory(&self, memory_id: &str) -> Result<()> {
        self.request_discarding(ApiRequest::delete(endpoints::memories::memory(memory_id)))
            .await
    }

    /// Memories around `at`; `radius_km` defaults to 0.5.
    pub async fn nearby_memories<T: DeserializeOwned>(
        &self,
        at: Coordinates,
        radius_km: Option<f64>,
    ) -> Result<T> {
        let request = ApiRequest::get(endpoints::memories::NEARBY)
            .query("latitude", at.latitude)
            .query("longitude", at.longitude)
            .query("radius", radius_km.unwrap_or(DEFAULT_NEARBY_RADIUS_KM));
        self.request(request).await
    }

    /// Page of the user's feed
    ///
    /// # Arguments
    /// * `page` - 1-based page number
    /// * `per_page` - Page size, usually [`DEFAULT_PAGE_SIZE`]
    pub async fn memory_feed<T: DeserializeOwned>(&self, page: u32, per_page: u32) -> Result<T> {
        let request = ApiRequest::get(endpoints::memories::FEED)
            .query("page", page)
            .query("per_page", per_page);
        self.request(request).await
    }

    /// Full-text search over memories
    ///
    /// # Arguments
    /// * `query` - Search text, sent as `q`
    /// * `filters` - Optional narrowing; unset filters are omitted from the query string
    pub async fn search_memories<T: DeserializeOwned>(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<T> {
        let request = filters
            .query_pairs()
            .into_iter()
            .fold(ApiRequest::get(endpoints::memories::SEARCH).query("q", query), |req, (k, v)| {
                req.query(k, v)
            });
        self.request(request).await
    }

    /// Memories posted by `user_id`, one page at a time
    pub async fn user_memories<T: DeserializeOwned>(&self, user_id: &str, page: u32) -> Result<T> {
        let request = ApiRequest::get(endpoints::memories::by_user(user_id)).query("page", page);
        self.request(request).await
    }
}

// Interactions
impl ApiClient {
    /// Like a memory
    pub async fn like_memory(&self, memory_id: &str) -> Result<()> {
        self.request_discarding(ApiRequest::post(endpoints::interactions::like(memory_id)))
            .await
    }

    pub async fn unlike_memory(&self, memory_id: &str) -> Result<()> {
        self.request_discarding(ApiRequest::delete(endpoints::interactions::unlike(memory_id)))
            .await
    }

    /// Comment on a memory. Returns the created comment.
    pub async fn add_comment<T: DeserializeOwned>(&self, memory_id: &str, content: &str) -> Result<T> {
        let request = ApiRequest::post(endpoints::interactions::comment(memory_id))
            .json(&json!({ "content": content }))?;
        self.request(request).await
    }

    /// Page of comments on a memory
    pub async fn comments<T: DeserializeOwned>(&self, memory_id: &str, page: u32) -> Result<T> {
        let request =
            ApiRequest::get(endpoints::interactions::comments(memory_id)).query("page", page);
        self.request(request).await
    }

    /// Flag a memory for moderation
    ///
    /// # Arguments
    /// * `memory_id` - Memory to report
    /// * `reason` - Free-text reason shown to moderators
    pub async fn report_memory(&self, memory_id: &str, reason: &str) -> Result<()> {
        let request = ApiRequest::post(endpoints::interactions::report(memory_id))
            .json(&json!({ "reason": reason }))?;
        self.request_discarding(request).await
    }
}

// Geospatial, uploads, health
impl ApiClient {
    /// Memories within `radius_km` of `center`
    pub async fn memories_in_area<T: DeserializeOwned>(
        &self,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<T> {
        let request = ApiRequest::get(endpoints::geospatial::MEMORIES_IN_AREA)
            .query("latitude", center.latitude)
            .query("longitude", center.longitude)
            .query("radius", radius_km);
        self.request(request).await
    }

    /// Locations with the most memories
    pub async fn popular_locations<T: DeserializeOwned>(&self) -> Result<T> {
        self.request(ApiRequest::get(endpoints::geospatial::POPULAR_LOCATIONS))
            .await
    }

    /// Upload a photo, video or audio file
    ///
    /// The uploaded file's URL goes into [`CreateMemoryRequest::content_url`].
    pub async fn upload_media<T: DeserializeOwned>(&self, form: MultipartBody) -> Result<T> {
        self.request(ApiRequest::post(endpoints::uploads::MEDIA).multipart(form))
            .await
    }

    /// Delete uploaded media
    pub async fn delete_media(&self, media_id: &str) -> Result<()> {
        self.request_discarding(ApiRequest::delete(endpoints::uploads::media(media_id)))
            .await
    }

    /// Server health; does not need a session.
    pub async fn health_check<T: DeserializeOwned>(&self) -> Result<T> {
        self.request(ApiRequest::get(endpoints::HEALTH)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html; charset=utf-8"));
        assert!(!is_json_content_type("text/plain"));
    }

    #[test]
    fn rejected_credentials_become_authentication_errors() {
        let err = rejected(ClientError::from_status(
            StatusCode::CONFLICT,
            Some("Username already taken".into()),
        ));
        assert!(matches!(err, ClientError::Authentication(ref m) if m == "Username already taken"));

        let err = rejected(ClientError::offline());
        assert!(matches!(err, ClientError::Network(_)));
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let config = ApiClientConfig::new("not a url");
        assert!(matches!(
            ApiClient::new(config, PlatformServices::default()),
            Err(ClientError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn base_url_can_be_switched() {
        let client =
            ApiClient::new(ApiClientConfig::default(), PlatformServices::default()).unwrap();
        client.set_base_url("https://memories.example.com/api/");
        assert_eq!(
            client.url_for(endpoints::HEALTH),
            "https://memories.example.com/api/health"
        );
    }
}
