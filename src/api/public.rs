use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::{ApiError, AppState};
use crate::fair::FairRoll;
use crate::store::{LeaderboardEntry, StockRecord};

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "network": state.network,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub result: f64,
    pub server_seed_hash: String,
}

/// Recompute a roll from its revealed seeds.
pub async fn verify(
    body: Result<Json<FairRoll>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(roll) = body?;
    Ok(Json(VerifyResponse {
        result: roll.result(),
        server_seed_hash: roll.server_seed_hash(),
    }))
}

pub async fn stock(State(state): State<AppState>) -> Result<Json<Vec<StockRecord>>, ApiError> {
    Ok(Json(state.store().list_stock().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

pub async fn leaderboard(
    State(state): State<AppState>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let Query(query) = query?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    Ok(Json(state.store().leaderboard(limit).await?))
}
