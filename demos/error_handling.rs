//! Example demonstrating error handling.
//!
//! This example shows how to:
//! - Handle API errors and read their trace ids
//! - Deal with deserialization failures
//! - React to rate limiting and an open circuit breaker
//! - Cancel a call that is waiting to retry
//!
//! Run with:
//! `SHOPLINE_HANDLE=open001 SHOPLINE_ACCESS_TOKEN=... cargo run --example error_handling`

use serde::Deserialize;
use slshop::{Client, Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("slshop=info").init();

    let client = Client::builder()
        .handle(std::env::var("SHOPLINE_HANDLE").unwrap_or_else(|_| "open001".to_string()))
        .access_token(std::env::var("SHOPLINE_ACCESS_TOKEN").unwrap_or_default())
        .max_retries(2)
        .circuit_breaker(3, Duration::from_secs(30))
        .build()?;
    let cancel = CancellationToken::new();

    println!("=== Example 1: Handling API Errors ===");
    let path = client.create_path("products/0.json");
    match client.get::<serde_json::Value>(&cancel, &path, None).await {
        Ok(response) => println!("Success: {}", response.data),
        Err(Error::Api(api)) => {
            println!("API Error!");
            println!("  Status: {}", api.status);
            println!("  Message: {:?}", api.message);
            println!("  Details: {}", api.details());
            println!("  Trace id: {:?}", api.trace_id);
            println!("  Raw response: {}", api.raw_body);
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 2: Handling Deserialization Errors ===");
    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct WrongSchema {
        nonexistent_field: String,
    }

    let path = client.create_path("merchants/shop.json");
    match client.get::<WrongSchema>(&cancel, &path, None).await {
        Ok(_) => println!("Unexpected success"),
        Err(Error::DeserializationFailed {
            raw_response,
            serde_error,
            status,
        }) => {
            println!("Deserialization failed (status {}): {}", status, serde_error);
            println!("  Raw response: {}", raw_response);
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 3: Rate Limits and the Circuit Breaker ===");
    match client.get::<serde_json::Value>(&cancel, &path, None).await {
        Ok(_) => println!("Call succeeded"),
        Err(e @ Error::RateLimited { .. }) | Err(e @ Error::CircuitOpen(_)) => {
            println!("Backing off: {}", e);
            println!("  Try again in: {:?}", e.retry_after());
        }
        Err(e) => println!("Other error: {} (retryable: {})", e, e.is_retryable()),
    }
    println!();

    println!("=== Example 4: Cancelling a Call ===");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    match client.get::<serde_json::Value>(&cancel, &path, None).await {
        Err(e) if e.is_cancelled() => println!("Cancelled: {}", e),
        Err(e) => println!("Failed before cancellation: {}", e),
        Ok(response) => println!("Finished within 200ms: {}", response.status),
    }

    Ok(())
}
