use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fairbox::store::{MemoryStore, PurchaseStore};
use fairbox::sweeper::{spawn_rate_limit_sweeper, spawn_replay_sweeper};
use fairbox::{router, AppState, ServiceConfig, SystemTimeProvider};

#[derive(Debug, Parser)]
#[command(name = "fairbox-server", version, about = "Lootbox purchase backend")]
struct Args {
    /// Address to listen on; overrides BIND_ADDR.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Keep purchases in memory even when Supabase is configured.
    #[arg(long)]
    memory_store: bool,
}

fn open_store(config: &ServiceConfig, memory_only: bool) -> Arc<dyn PurchaseStore> {
    #[cfg(feature = "supabase")]
    {
        if let (Some(supabase), false) = (&config.supabase, memory_only) {
            return Arc::new(fairbox::store::SupabaseStore::new(
                supabase.url.clone(),
                supabase.key.expose(),
            ));
        }
    }
    #[cfg(not(feature = "supabase"))]
    let _ = (config, memory_only);

    warn!("using in-memory store; purchases are lost on restart");
    Arc::new(MemoryStore::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fairbox=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    let mut config = ServiceConfig::from_env().context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let store = open_store(&config, args.memory_store);
    let state = AppState::from_config(&config, store, Arc::new(SystemTimeProvider))
        .context("building application state")?;

    info!(
        network = %config.solana_network,
        bind = %config.bind_addr,
        backend_pubkey = %state.signer.pubkey_base58(),
        store = state.store().kind(),
        "starting fairbox"
    );

    let sweepers = [
        spawn_replay_sweeper(state.settlement.validator().clone(), config.replay_sweep_every),
        spawn_rate_limit_sweeper(state.limits.clone(), config.rate_limit_sweep_every),
    ];

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    let served = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    for sweeper in &sweepers {
        sweeper.abort();
    }
    served.context("serving http")?;
    info!("fairbox stopped");
    Ok(())
}
