use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::api::error::apply_rate_limit_headers;
use crate::api::middleware::{enforce, ClientIp};
use crate::api::{ApiError, AppState};
use crate::pricing::BoxType;
use crate::ratelimit::{RateLimitDecision, RateLimitKey};
use crate::settlement::SavePurchase;
use crate::signing::PurchaseAuthorization;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub box_type: BoxType,
    pub wallet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub box_type: BoxType,
    #[serde(flatten)]
    pub authorization: PurchaseAuthorization,
}

fn with_rate_limit_headers(response: impl IntoResponse, decision: &RateLimitDecision) -> Response {
    let mut response = response.into_response();
    apply_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Count against the wallet from a parsed body, or the IP when the body did not parse.
fn purchase_limit<T>(
    state: &AppState,
    ip: ClientIp,
    body: &Result<Json<T>, JsonRejection>,
    wallet: impl Fn(&T) -> &str,
) -> Result<RateLimitDecision, ApiError> {
    let wallet = body.as_ref().ok().map(|Json(b)| wallet(b));
    enforce(&state.limits.purchase, &RateLimitKey::wallet_or_ip(wallet, ip.0))
}

/// Sign an authorization the on-chain program will accept for this wallet.
pub async fn create_purchase(
    State(state): State<AppState>,
    Extension(ip): Extension<ClientIp>,
    body: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let decision = purchase_limit(&state, ip, &body, |b| b.wallet.as_str())?;
    let Json(req) = body?;

    let quote = state.prices.quote(req.box_type)?;
    let timestamp = state.now();
    debug!(
        box_type = %req.box_type,
        price_usd = quote.price_usd(),
        token_amount = quote.token_amount,
        "quoted box"
    );

    let authorization = state
        .signer
        .authorize(&req.wallet, quote.token_amount, timestamp)?;
    info!(wallet = %authorization.wallet, box_type = %req.box_type, timestamp, "purchase authorized");

    let response = PurchaseResponse {
        box_type: req.box_type,
        authorization,
    };
    Ok(with_rate_limit_headers(Json(response), &decision))
}

/// Record a purchase that has landed on chain.
pub async fn save_purchase(
    State(state): State<AppState>,
    Extension(ip): Extension<ClientIp>,
    body: Result<Json<SavePurchase>, JsonRejection>,
) -> Result<Response, ApiError> {
    let decision = purchase_limit(&state, ip, &body, |b| b.wallet.as_str())?;
    let Json(req) = body?;

    let purchase = state.settlement.save_purchase(req).await?;
    let body = Json(json!({ "success": true, "purchase": purchase }));
    Ok(with_rate_limit_headers((StatusCode::CREATED, body), &decision))
}
