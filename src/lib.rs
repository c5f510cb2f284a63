//! Memory Lane Rust Client
//!
//! A client library for the Memory Lane REST API, with bearer-token
//! sessions, transparent token refresh on 401, request timeouts and bounded
//! retries of transient failures.

pub mod api_client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod platform;
pub mod request;
pub mod session;
pub mod token_store;
pub mod types;

pub use api_client::ApiClient;
pub use config::ApiClientConfig;
pub use error::{ClientError, Result};
pub use platform::{Clock, PlatformServices, Reachability, StaticReachability, TcpReachability, TokioClock};
pub use request::{ApiRequest, MultipartBody, RequestBody};
pub use session::AuthState;
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{AuthResponse, Coordinates, Credentials, LoginRequest, RegisterRequest};
