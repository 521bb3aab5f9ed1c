use price_gateway::{FetchOptions, Gateway, GatewayConfig, ListingQuery, Tier};
use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Debug, Serialize)]
struct PriceReport {
    median_cents: u64,
    sample_size: u32,
}

// Stand-in for the real marketplace pricing call.
async fn fetch_price_history() -> price_gateway::Result<PriceReport> {
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(PriceReport {
        median_cents: 12_500,
        sample_size: 42,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let gateway: Gateway<PriceReport> = Gateway::new(GatewayConfig::default());

    let query = ListingQuery::new(
        "ThinkPad X220".to_string(),
        Some("X220".to_string()),
        Some("Lenovo".to_string()),
        Some("Used".to_string()),
    );
    let fingerprint = query.fingerprint();

    // First lookup goes upstream.
    let start = std::time::Instant::now();
    let report = gateway
        .fetch(
            fingerprint.clone(),
            Tier::Standard,
            fetch_price_history,
            FetchOptions::default(),
        )
        .await?;
    println!("First lookup took {:?}: {:?}", start.elapsed(), report);

    // Second lookup is a cache hit.
    let start = std::time::Instant::now();
    let report = gateway
        .fetch(
            fingerprint.clone(),
            Tier::Standard,
            fetch_price_history,
            FetchOptions::default(),
        )
        .await?;
    println!("Cached lookup took {:?}: {:?}", start.elapsed(), report);

    // Concurrent lookups with the same fingerprint share one upstream call.
    let other = ListingQuery::new("Gameboy Color".to_string(), None, None, None).fingerprint();
    let (a, b) = tokio::join!(
        gateway.fetch(
            other.clone(),
            Tier::Standard,
            fetch_price_history,
            FetchOptions::default(),
        ),
        gateway.fetch(
            other.clone(),
            Tier::Privileged,
            fetch_price_history,
            FetchOptions::default(),
        ),
    );
    println!("Pooled lookups: {:?} / {:?}", a?, b?);

    println!(
        "Gateway stats: {}",
        serde_json::to_string_pretty(&gateway.stats())?
    );

    Ok(())
}
