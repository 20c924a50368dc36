//! Shared setup for integration tests.
//!
//! These tests need a running PostgreSQL database. Set `DATABASE_URL` (a
//! `.env` file works) to run them; without it each test skips rather than
//! fails, so the unit suite stays green on machines with no database.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use cruise_store::database::schema::apply_schema;
use cruise_store::{
    default_registry, BlobStore, MemoryBlobStore, ObserverSet, Store,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub async fn try_pool() -> Option<PgPool> {
    init_tracing();
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    apply_schema(&pool).await.expect("failed to apply schema");
    Some(pool)
}

/// A store over the test database with the default registry, no observers,
/// and an in-memory blob store.
pub async fn try_store() -> Option<Store> {
    let pool = try_pool().await?;
    Some(Store::new(
        pool,
        default_registry(),
        ObserverSet::new(),
        Arc::new(MemoryBlobStore::new()),
    ))
}

/// Same, but with the given observers and blob store.
pub async fn try_store_with(
    observers: ObserverSet,
    blobs: Arc<dyn BlobStore>,
) -> Option<Store> {
    let pool = try_pool().await?;
    Some(Store::new(pool, default_registry(), observers, blobs))
}

