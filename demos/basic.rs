//! Basic example showing how to use sea-orm-apm.
//!
//! Run with: cargo run --example basic

use sea_orm::{ConnectionTrait, Database};
use sea_orm_apm::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_apm=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Obfuscation works without a database
    let obfuscator = Obfuscator::new();
    let statement = "SELECT * FROM users WHERE email = 'someone@example.com' AND age > 30";
    tracing::info!(obfuscated = %obfuscator.obfuscate(statement), "obfuscated statement");

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/test".into());

    tracing::info!("Connecting to database...");

    let config = ApmConfig::development().with_default_label("service", "basic-example");
    let db = Database::connect(&database_url)
        .await?
        .with_apm_config(config.clone());

    let mut transaction = Transaction::new("basic example", "script", &config);
    transaction.start_now()?;

    // Every statement run through the bound connection becomes a span
    let traced = db.for_transaction(&transaction);
    traced.execute_unprepared("SELECT 1").await?;

    transaction.done_now(Some("success"))?;
    tracing::info!(
        duration_us = transaction.duration().unwrap_or(0),
        self_time_us = transaction.self_time().unwrap_or(0),
        spans = transaction.span_counts().started,
        "transaction finished"
    );

    Ok(())
}
