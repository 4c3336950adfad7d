//! Keel demo entry point.

use std::error::Error;
use std::time::{SystemTime, UNIX_EPOCH};

use keel_demo::backend::Backend;
use keel_demo::config::DemoConfig;
use keel_demo::scenario;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = DemoConfig::from_env()?;
    let backend = Backend::from_config(&config).await?;
    tracing::info!(
        backend = backend.name,
        snapshot_policy = ?config.snapshot_policy,
        "Starting Keel demo"
    );

    // Fresh id per run so repeated runs against one database do not collide.
    let started = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    let report = scenario::run(&backend, &format!("account-{started}")).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
