//! HTTP surface of the lootbox backend.

pub mod admin;
pub mod error;
pub mod middleware;
pub mod public;
pub mod purchase;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{SecretString, ServiceConfig, SolanaNetwork};
use crate::error::Error;
use crate::guard::{MokaUsedTimestamps, TimestampValidator};
use crate::pricing::PriceTable;
use crate::ratelimit::RateLimits;
use crate::settlement::SettlementService;
use crate::signing::PurchaseSigner;
use crate::store::PurchaseStore;
use crate::time::TimeProvider;

pub use error::ApiError;
pub use middleware::ClientIp;

/// Shared handles every handler sees.
#[derive(Clone)]
pub struct AppState {
    pub signer: Arc<PurchaseSigner>,
    pub prices: Arc<PriceTable>,
    pub settlement: Arc<SettlementService>,
    pub limits: Arc<RateLimits>,
    pub admin_secret: Arc<SecretString>,
    pub network: SolanaNetwork,
    pub time_provider: Arc<dyn TimeProvider>,
}

impl AppState {
    /// Wire the guards and services described by `config` around `store`.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn PurchaseStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self, Error> {
        let signer = PurchaseSigner::from_encoded(config.private_key.expose())
            .map_err(|e| Error::InvalidConfig(format!("PRIVATE_KEY: {e}")))?;
        let replay_store = Arc::new(MokaUsedTimestamps::new(config.guard.max_capacity));
        let validator =
            TimestampValidator::new(config.guard.clone(), replay_store, time_provider.clone())?;
        let settlement = SettlementService::new(
            Arc::new(validator),
            store,
            config.physical_prize_ids.clone(),
            config.token_amount,
        );
        let limits = RateLimits::new(
            config.general_limit.clone(),
            config.purchase_limit.clone(),
            config.admin_limit.clone(),
            time_provider.clone(),
        )?;

        Ok(Self {
            signer: Arc::new(signer),
            prices: Arc::new(PriceTable::with_token_amount(config.token_amount)),
            settlement: Arc::new(settlement),
            limits: Arc::new(limits),
            admin_secret: Arc::new(config.admin_secret.clone()),
            network: config.solana_network,
            time_provider,
        })
    }

    pub fn store(&self) -> &Arc<dyn PurchaseStore> {
        self.settlement.store()
    }

    pub fn now(&self) -> u64 {
        self.time_provider.now_seconds()
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/verify", post(public::verify))
        .route("/api/stock", get(public::stock))
        .route("/api/leaderboard", get(public::leaderboard))
        .route_layer(from_fn_with_state(state.clone(), middleware::general_limit));

    // The purchase limiter keys on the wallet in the body, so handlers apply it.
    let purchase = Router::new()
        .route("/api/purchase", post(purchase::create_purchase))
        .route("/api/save-purchase", post(purchase::save_purchase));

    // Innermost layer runs last: rate limit, then auth.
    let admin = Router::new()
        .route("/api/admin/purchases", get(admin::list_purchases))
        .route("/api/admin/purchases/{id}/status", patch(admin::update_status))
        .route("/api/admin/stock/{prize_id}", put(admin::set_stock))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin))
        .route_layer(from_fn_with_state(state.clone(), middleware::admin_limit));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(public::health))
        .merge(public)
        .merge(purchase)
        .merge(admin)
        .layer(from_fn(middleware::resolve_client_ip))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
