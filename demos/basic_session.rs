//! Basic session example
//!
//! Usage:
//!   CRM_API_BASE_URL=http://localhost:8080/api CRM_EMAIL=... CRM_PASSWORD=... \
//!     cargo run --example basic_session

use crm_rs_client::{
    ActivitySink, ApiClient, ApiResponse, ClientConfig, FileStorage, LoginRequest,
    SessionSupervisor,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crm_rs_client=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ClientConfig::from_env()?;
    let storage = Arc::new(FileStorage::open(FileStorage::default_location()?)?);

    println!("=== CRM Rust Client Example ===");
    println!("Backend: {}", config.base_url);
    println!("Storage: {}", storage.path().display());
    println!();

    let client = Arc::new(ApiClient::new(config, storage)?);

    if client.is_authenticated() {
        println!("✓ Restored session for {:?}", client.current_user().map(|u| u.email));
    } else {
        let email = std::env::var("CRM_EMAIL").unwrap_or_else(|_| "admin@example.com".to_string());
        let password = std::env::var("CRM_PASSWORD").unwrap_or_else(|_| "admin123".to_string());

        let user = client.login(&LoginRequest::new(email, password)).await?;
        println!("✓ Logged in as {} ({})", user.email, user.id);
    }
    println!();

    // Session checks every minute, plus cross-handle logout detection
    let supervisor = SessionSupervisor::new(Arc::clone(&client));
    let task = supervisor.spawn();

    // A few concurrent calls; if the access token has expired they share one refresh
    let (contacts, templates, stats) = tokio::join!(
        client.get::<ApiResponse<serde_json::Value>>("/contacts?page=0&size=5"),
        client.get::<ApiResponse<serde_json::Value>>("/templates"),
        client.get::<ApiResponse<serde_json::Value>>("/analytics/dashboard"),
    );

    for (name, result) in [("contacts", contacts), ("templates", templates), ("analytics", stats)] {
        match result {
            Ok(response) => println!("✓ {name}: {}", response.message),
            Err(e) => {
                let error = e.to_api_error(None);
                println!("! {name}: {} (status {})", error.message, error.status_code);
            }
        }
    }
    println!();

    supervisor.record_activity();
    println!("Session valid: {}", supervisor.check_session().await);

    task.abort();
    Ok(())
}
