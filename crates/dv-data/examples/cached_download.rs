use std::sync::Arc;

use chrono::NaiveDate;
use dv_data::{CachedClient, CacheConfig, CalendarPolicy, RangeQuery, SampleDataProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dv_data=debug".into()),
        )
        .init();

    let provider = Arc::new(SampleDataProvider::new());
    let client = CachedClient::with_config(
        CacheConfig::default(),
        CalendarPolicy::naive(),
        provider.clone(),
    )?;

    let query = RangeQuery::between(
        NaiveDate::from_ymd_opt(2023, 12, 18).unwrap(),
        NaiveDate::from_ymd_opt(2023, 12, 22).unwrap(),
    );

    let rows = client.download_one("AAPL", &query).await?;
    println!(
        "first pass: {} rows, {} upstream request(s)",
        rows.len(),
        provider.price_requests().len()
    );

    let rows = client.download_one("AAPL", &query).await?;
    println!(
        "second pass: {} rows, {} upstream request(s) total",
        rows.len(),
        provider.price_requests().len()
    );

    let expirations = client.get_options_expirations("AAPL", true).await?;
    if let Some(expiration) = expirations.first() {
        let chain = client.get_option_chain("AAPL", Some(*expiration), true).await?;
        println!(
            "chain for {expiration}: {} calls, {} puts",
            chain.calls.len(),
            chain.puts.len()
        );
    }

    Ok(())
}
