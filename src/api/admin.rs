use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::store::{Purchase, PurchaseFilter, PurchaseStatus, StockRecord, DEFAULT_LIST_LIMIT};

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseQuery {
    pub status: Option<String>,
    pub wallet: Option<String>,
    pub limit: Option<usize>,
}

impl PurchaseQuery {
    fn into_filter(self) -> Result<PurchaseFilter, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<PurchaseStatus>)
            .transpose()
            .map_err(ApiError::BadRequest)?;
        Ok(PurchaseFilter {
            wallet: self.wallet.filter(|w| !w.trim().is_empty()),
            status,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, DEFAULT_LIST_LIMIT)),
        })
    }
}

pub async fn list_purchases(
    State(state): State<AppState>,
    query: Result<Query<PurchaseQuery>, QueryRejection>,
) -> Result<Json<Vec<Purchase>>, ApiError> {
    let Query(query) = query?;
    let rows = state.store().list_purchases(query.into_filter()?).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: PurchaseStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Purchase>, ApiError> {
    let Path(id) = id?;
    let Json(update) = body?;
    Ok(Json(state.settlement.update_status(id, update.status).await?))
}

#[derive(Debug, Deserialize)]
pub struct StockUpdate {
    pub count: u32,
}

pub async fn set_stock(
    State(state): State<AppState>,
    Path(prize_id): Path<String>,
    body: Result<Json<StockUpdate>, JsonRejection>,
) -> Result<Json<StockRecord>, ApiError> {
    let Json(update) = body?;
    Ok(Json(state.settlement.restock(&prize_id, update.count).await?))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};

    use crate::api::tests::{app, body_json, send, TestApp, ADMIN_SECRET};
    use crate::settlement::tests::request;

    fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {ADMIN_SECRET}"));
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn settled(app: &TestApp) -> String {
        let row = app
            .state
            .settlement
            .save_purchase(request("tx1", "sticker"))
            .await
            .unwrap();
        row.id.to_string()
    }

    #[tokio::test]
    async fn admin_routes_require_bearer_secret() {
        let app = app();
        let anonymous = Request::builder()
            .uri("/api/admin/purchases")
            .body(Body::empty())
            .unwrap();
        let (status, resp) = send(&app, anonymous).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key("x-ratelimit-remaining"));

        let wrong = Request::builder()
            .uri("/api/admin/purchases")
            .header("authorization", "Bearer guess")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_and_filters_purchases() {
        let app = app();
        settled(&app).await;

        let (status, resp) = send(&app, authed("GET", "/api/admin/purchases", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

        let (_, resp) = send(&app, authed("GET", "/api/admin/purchases?status=delivered", None)).await;
        assert!(body_json(resp).await.as_array().unwrap().is_empty());

        let (status, _) = send(&app, authed("GET", "/api/admin/purchases?status=lost", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_update_follows_lifecycle() {
        let app = app();
        let id = settled(&app).await;
        let uri = format!("/api/admin/purchases/{id}/status");

        let (status, resp) =
            send(&app, authed("PATCH", &uri, Some(json!({ "status": "delivered" })))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "delivered");

        let (status, _) =
            send(&app, authed("PATCH", &uri, Some(json!({ "status": "failed" })))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            authed(
                "PATCH",
                "/api/admin/purchases/not-a-uuid/status",
                Some(json!({ "status": "failed" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = format!("/api/admin/purchases/{}/status", uuid::Uuid::new_v4());
        let (status, _) =
            send(&app, authed("PATCH", &missing, Some(json!({ "status": "failed" })))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn restock_sets_count() {
        let app = app();
        let (status, resp) =
            send(&app, authed("PUT", "/api/admin/stock/hoodie", Some(json!({ "count": 25 })))).await;
        assert_eq!(status, StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["prize_id"], "hoodie");
        assert_eq!(body["count"], 25);

        let (status, _) =
            send(&app, authed("PUT", "/api/admin/stock/hoodie", Some(json!({ "count": -1 })))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
