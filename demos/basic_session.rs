//! Basic session example
//!
//! Usage:
//!   MEMORY_LANE_API_URL=http://localhost:5000/api \
//!   MEMORY_LANE_USERNAME=alice MEMORY_LANE_PASSWORD=secret1 \
//!   cargo run --example basic_session

use memory_lane_client::api_client::DEFAULT_PAGE_SIZE;
use memory_lane_client::{
    ApiClient, ApiClientConfig, FileTokenStore, LoginRequest, PlatformServices,
};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ApiClientConfig::from_env()?;
    let username = std::env::var("MEMORY_LANE_USERNAME").unwrap_or_else(|_| "alice".to_string());
    let password = std::env::var("MEMORY_LANE_PASSWORD").unwrap_or_else(|_| "secret1".to_string());
    let token_file = std::env::var("MEMORY_LANE_TOKEN_FILE")
        .unwrap_or_else(|_| ".memory-lane/tokens.json".to_string());

    println!("=== Memory Lane Client Example ===");
    println!("API: {}", config.base_url);
    println!();

    let platform =
        PlatformServices::default().with_token_store(Arc::new(FileTokenStore::new(&token_file)));
    let client = ApiClient::new(config, platform)?;

    let state = client.restore_session().await?;
    println!("Session state after restore: {state:?}");

    if !client.verify_token().await {
        println!("No valid session, logging in as {username}...");
        let auth = client
            .login(&LoginRequest::with_username(&username, &password))
            .await?;
        println!("✓ Logged in as {}", auth.user.username);
    } else {
        println!("✓ Persisted session is still valid");
    }
    println!();

    let health: Value = client.health_check().await?;
    println!("Health: {health}");

    let feed: Value = client.memory_feed(1, DEFAULT_PAGE_SIZE).await?;
    println!("Feed page 1: {feed}");
    println!();

    client.logout().await;
    println!("✓ Logged out, tokens removed from {token_file}");

    Ok(())
}
