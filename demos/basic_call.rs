//! Basic example: list and create products with a static access token.
//!
//! This example shows how to:
//! - Create a client for a store handle
//! - Make GET requests with typed query options
//! - Make POST requests with a JSON body
//! - Access response data and metadata
//!
//! Run with:
//! `SHOPLINE_HANDLE=open001 SHOPLINE_ACCESS_TOKEN=... cargo run --example basic_call`

use serde::{Deserialize, Serialize};
use slshop::query::ListOptions;
use slshop::{Client, Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Product {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct Products {
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct ProductEnvelope {
    product: Product,
}

#[derive(Debug, Serialize)]
struct NewProduct<'a> {
    product: NewProductFields<'a>,
}

#[derive(Debug, Serialize)]
struct NewProductFields<'a> {
    title: &'a str,
    body_html: &'a str,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("slshop=debug,basic_call=info")
        .init();

    let handle = std::env::var("SHOPLINE_HANDLE").unwrap_or_else(|_| "open001".to_string());
    let token = std::env::var("SHOPLINE_ACCESS_TOKEN").unwrap_or_default();

    let client = Client::builder()
        .handle(handle)
        .access_token(token)
        .max_retries(3)
        .timeout(Duration::from_secs(15))
        .build()?;
    let cancel = CancellationToken::new();

    println!("=== GET Request Example ===");
    let path = client.create_path("products/products.json");
    let opts = ListOptions {
        limit: 5,
        fields: "id,title".to_string(),
        ..Default::default()
    };
    let response = client.get::<Products>(&cancel, &path, Some(&opts)).await?;

    for product in &response.data.products {
        println!("{} - {}", product.id, product.title);
    }
    println!("Request latency: {:?}", response.latency);
    println!("Status code: {}", response.status);
    println!();

    println!("=== POST Request Example ===");
    let new_product = NewProduct {
        product: NewProductFields {
            title: "Linen shirt",
            body_html: "<p>Breathable summer shirt</p>",
        },
    };
    let response = client
        .post::<_, ProductEnvelope>(&cancel, &path, &new_product)
        .await?;

    println!("Created product ID: {}", response.data.product.id);
    println!();

    println!("=== Accessing Response Metadata ===");
    println!("Raw response length: {} bytes", response.raw_body.len());
    println!("Content-Type: {:?}", response.header("content-type"));
    println!("Attempts: {}", response.attempts);

    Ok(())
}
