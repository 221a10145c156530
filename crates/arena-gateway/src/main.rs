use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use adjudication::providers::{ClientSet, DEFAULT_CALL_TIMEOUT};
use adjudication::quota::QuotaStore;
use adjudication::{AdmissionGate, MemoryAuditLog, MemoryQuotaStore, QuotaLedger, RedisQuotaStore};
use arena_gateway::{build_router, AppState, ArenaConfig};

#[derive(Parser)]
#[command(name = "arena-gateway", about = "Claim-arena debate service")]
struct Args {
    /// Bind address, overriding ARENA_BIND_ADDR.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ArenaConfig::default();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let store: Arc<dyn QuotaStore> = match &config.redis_url {
        Some(url) => {
            info!(url, "using redis quota store");
            Arc::new(RedisQuotaStore::new(url).context("redis quota store")?)
        }
        None => {
            info!("no redis url configured, using in-process quota store");
            Arc::new(MemoryQuotaStore::new())
        }
    };

    let keys = config.api_keys();
    let clients = Arc::new(
        ClientSet::from_keys(&keys, DEFAULT_CALL_TIMEOUT).context("building provider clients")?,
    );
    info!(models = ?clients.available(), "provider clients ready");

    let ledger = Arc::new(QuotaLedger::new(store, config.quota_limits()));
    let state = AppState {
        clients,
        gate: Arc::new(AdmissionGate::new(ledger)),
        audit: Arc::new(MemoryAuditLog::new(config.audit_budget_bytes)),
        debate_timeout: config.debate_timeout,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "arena gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving")?;

    Ok(())
}
