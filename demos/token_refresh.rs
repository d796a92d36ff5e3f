//! Example: automatic access token management.
//!
//! This example shows how to:
//! - Exchange an authorization code for a first token
//! - Persist tokens with a file-backed store
//! - Let the client refresh tokens before they expire
//! - Share one token manager between many concurrent calls
//!
//! Run with:
//! `SHOPLINE_HANDLE=open001 SHOPLINE_APP_KEY=... SHOPLINE_APP_SECRET=... \
//!  SHOPLINE_AUTH_CODE=... cargo run --example token_refresh`

use chrono::{DateTime, Utc};
use slshop::auth::{App, TokenEndpoint};
use slshop::{Client, FileTokenStore, TokenManager};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("slshop=debug,token_refresh=info")
        .init();

    let handle = std::env::var("SHOPLINE_HANDLE").unwrap_or_else(|_| "open001".to_string());
    let app = App::new(
        std::env::var("SHOPLINE_APP_KEY")?,
        std::env::var("SHOPLINE_APP_SECRET")?,
    );

    let endpoint = Arc::new(TokenEndpoint::new(app.clone())?);
    let manager = Arc::new(
        TokenManager::builder(&handle, &app.app_key, endpoint.clone())
            .store(Arc::new(FileTokenStore::new("./.shopline-tokens")))
            .refresh_buffer(Duration::from_secs(10 * 60))
            .build(),
    );

    // A fresh installation starts from an authorization code; afterwards the
    // persisted token is picked up on the first call.
    if let Ok(code) = std::env::var("SHOPLINE_AUTH_CODE") {
        println!("=== Exchanging authorization code ===");
        let response = endpoint.create_token(&handle, &code).await?;
        if let Some(data) = response.data {
            let expire_at = DateTime::parse_from_rfc3339(&data.expire_time)
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now() + chrono::Duration::hours(10));
            manager
                .set_initial_token(data.access_token, expire_at, data.scope)
                .await?;
            println!("Token stored, expires at {}", expire_at);
        }
        println!();
    }

    let client = Client::builder()
        .handle(&handle)
        .token_manager(manager.clone())
        .max_retries(2)
        .circuit_breaker(5, Duration::from_secs(30))
        .build()?;

    println!("=== Concurrent calls share one refresh ===");
    let cancel = CancellationToken::new();
    let path = client.create_path("merchants/shop.json");
    let calls = (0..10).map(|_| {
        let client = client.clone();
        let cancel = cancel.clone();
        let path = path.clone();
        tokio::spawn(async move { client.get::<serde_json::Value>(&cancel, &path, None).await })
    });

    for call in calls {
        match call.await? {
            Ok(response) => println!("status {} after {:?}", response.status, response.latency),
            Err(e) => println!("call failed: {}", e),
        }
    }

    if let Some(token) = manager.current_token() {
        println!("Current token expires at {}", token.expire_at);
    }

    Ok(())
}
