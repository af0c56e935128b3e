//! ==============================================================================
//! main.rs - iot panel entry point
//! ==============================================================================
//!
//! purpose:
//!     a terminal panel for the home hub. it shows the living-room door
//!     (ABIERTA / CERRADA) and the temperature sensor, toggles the door on
//!     request, and keeps the hub's static assets reachable while offline.
//!
//! responsibilities:
//!     - load configuration (config/panel.toml)
//!     - install + activate the offline asset cache
//!     - serve the cache-first asset proxy
//!     - poll the hub's state endpoint and render it to the console
//!     - map keyboard commands onto the refresh / toggle controls
//!
//! relationships:
//!     - uses: config.rs (PanelConfig)
//!     - uses: poller.rs (StatusPoller, Controls)
//!     - uses: view.rs (ConsoleView)
//!     - uses: cache.rs (OfflineCache, CacheStorage, HttpFetcher)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust panel (this file)                    │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ keyboard    │  │ status      │  │ asset proxy         │  │
//!     │  │ (r / t / q) │─▶│ poller      │  │ (cache-first)       │  │
//!     │  └─────────────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     └──────────────────────────┼────────────────────┼─────────────┘
//!                                │ /api/state         │ /, /static/*
//!                                │ /api/toggle/...    │
//!                                ▼                    ▼
//!                         ┌───────────────────────────────┐
//!                         │            home hub           │
//!                         └───────────────────────────────┘
//!
//! ==============================================================================

mod cache;
mod config;
mod domain;
mod poller;
mod view;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use cache::{AssetFetcher, CacheStorage, CachedResponse, HttpFetcher, OfflineCache};
use poller::{Controls, StatusPoller};
use view::ConsoleView;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  IoT Home Panel");
    println!("  door + temperature, offline-ready");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::PanelConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    // step 3: offline cache + asset proxy
    let storage = if config.cache.enabled {
        match CacheStorage::open_dir(&config.cache.dir).await {
            Ok(storage) => Some(storage),
            Err(e) => {
                println!("[STARTUP] ⚠ Offline cache disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };
    if let Some(storage) = storage {
        println!("\n[STARTUP] Installing offline cache {}...", config.cache.version);
        let fetcher = HttpFetcher::new(config.endpoints.clone())?;
        let cache = Arc::new(OfflineCache::new(&config.cache, storage, fetcher));

        match cache.install().await {
            Ok(count) => println!("[STARTUP] ✓ Cached {} assets in {}", count, cache.version()),
            Err(e) => println!("[STARTUP] ⚠ Offline cache not populated: {}", e),
        }
        if let Err(e) = cache.activate().await {
            println!("[STARTUP] ⚠ Old caches not removed: {}", e);
        }

        let listen = config.cache.listen.clone();
        tokio::spawn(async move {
            println!("[STARTUP] ✓ Asset proxy live at http://{}", listen);
            if let Err(e) = run_server(cache, &listen).await {
                eprintln!("[ERROR] Asset proxy error: {:#}", e);
            }
        });
    }

    // step 4: poller + controls
    let view = ConsoleView::new(config.logging.show_readings);
    let poller = StatusPoller::new(&config.endpoints, view)?;

    let (refresh_tx, refresh_rx) = mpsc::channel(8);
    let (toggle_tx, toggle_rx) = mpsc::channel(8);
    let _bindings = poller.start(Controls { refresh: Some(refresh_rx), toggle: Some(toggle_rx) });

    // step 5: optional periodic refresh
    if config.polling.interval_seconds > 0 {
        poller.spawn_interval(Duration::from_secs(config.polling.interval_seconds));
    }

    println!("\n[RUNTIME] Commands: r = refresh, t = toggle door, q = quit");
    println!("────────────────────────────────────────────────────────────");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "r" | "refresh" => { refresh_tx.send(()).await.ok(); }
                        "t" | "toggle" if !poller.toggle_enabled() => {
                            println!("[CONTROL] toggle in progress, wait");
                        }
                        "t" | "toggle" => { toggle_tx.send(()).await.ok(); }
                        "q" | "quit" => break,
                        "" => {}
                        other => println!("[RUNTIME] unknown command '{}'", other),
                    },
                    // detached from a terminal: keep serving until ctrl-c
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!("stdin closed: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("[RUNTIME] Shutting down");
    Ok(())
}

// ==============================================================================
// asset proxy
// ==============================================================================

async fn run_server<F: AssetFetcher>(cache: Arc<OfflineCache<F>>, listen: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    axum::serve(listener, proxy_router(cache)).await?;
    Ok(())
}

fn proxy_router<F: AssetFetcher>(cache: Arc<OfflineCache<F>>) -> Router {
    Router::new()
        .fallback(intercept::<F>)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(cache)
}

/// every request goes through the cache; only GET is proxied
async fn intercept<F: AssetFetcher>(
    State(cache): State<Arc<OfflineCache<F>>>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "asset proxy only serves GET").into_response();
    }

    let key = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    match cache.respond(key).await {
        Ok(asset) => asset_response(asset),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

fn asset_response(asset: CachedResponse) -> Response {
    let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = asset.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok());

    let mut response = (status, asset.body).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    response
}
