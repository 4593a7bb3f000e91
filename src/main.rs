//! netcache - fetch URLs through the caching engine
//!
//! Usage: `netcache <url>...`
//!
//! Each URL is fetched twice so the second request shows the cache at work.
//! Configuration comes from `NETCACHE_*` environment variables.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netcache::{Config, Engine, HttpMethod, Operation, OperationStatus, ReqwestTransport};

/// One line of output per fetch.
#[derive(Debug, Serialize)]
struct FetchReport<'a> {
    url: &'a str,
    attempt: u32,
    status: OperationStatus,
    http_status: Option<u16>,
    cached: bool,
    fresh: bool,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> FetchReport<'a> {
    fn new(url: &'a str, attempt: u32, operation: &Operation) -> Self {
        Self {
            url,
            attempt,
            status: operation.status(),
            http_status: operation.http_status_code(),
            cached: operation.is_cached_response(),
            fresh: operation.is_fresh(),
            bytes: operation.response_data().map_or(0, |data| data.len()),
            error: operation.error().map(ToString::to_string),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        bail!("usage: netcache <url>...");
    }

    let config = Config::from_env();
    info!(
        "Configuration loaded: memory={}B, disk={}B at {}, workers={}",
        config.memory_cache_size,
        config.disk_cache_size,
        config.cache_dir.display(),
        config.workers
    );

    let transport = ReqwestTransport::new(&config).context("failed to build HTTP transport")?;
    let engine = Engine::new(config, Arc::new(transport));

    for url in &urls {
        for attempt in 1..=2 {
            let mut operation =
                engine.create_operation(url.as_str(), Vec::<(String, String)>::new(), HttpMethod::Get);
            engine.execute_operation(&mut operation, false).await;

            let report = FetchReport::new(url, attempt, &operation);
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    engine.shutdown().await;
    Ok(())
}
