use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

use crate::store::types::{
    LeaderboardEntry, NewPurchase, Purchase, PurchaseFilter, PurchaseStatus, StockRecord,
};
use crate::store::{PurchaseStore, StoreError, DEFAULT_LIST_LIMIT};

const PURCHASES: &str = "purchases";
const STOCK: &str = "stock";
const LEADERBOARD: &str = "leaderboard";

/// PostgREST client for the Supabase project backing the shop.
///
/// Expects table `purchases`, table `stock`, view `leaderboard` and the RPCs
/// `decrement_stock(p_prize_id)` (remaining count, `null` when empty) and
/// `increment_stock(p_prize_id)`.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    supabase_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(supabase_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), supabase_url, api_key)
    }

    pub fn with_client(
        client: Client,
        supabase_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let supabase_url: String = supabase_url.into();
        Self {
            client,
            supabase_url: supabase_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.supabase_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.rest_url(path))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn insert_purchase_request(&self, purchase: &NewPurchase) -> RequestBuilder {
        self.request(Method::POST, PURCHASES)
            .header("Prefer", "return=representation")
            .json(purchase)
    }

    fn list_purchases_request(&self, filter: &PurchaseFilter) -> RequestBuilder {
        let mut query: Vec<(&str, String)> = vec![
            ("select", "*".to_owned()),
            ("order", "created_at.desc".to_owned()),
            ("limit", filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).to_string()),
        ];
        if let Some(wallet) = &filter.wallet {
            query.push(("wallet", format!("eq.{wallet}")));
        }
        if let Some(status) = filter.status {
            query.push(("status", format!("eq.{status}")));
        }
        self.request(Method::GET, PURCHASES).query(&query)
    }

    fn transition_request(
        &self,
        id: Uuid,
        from: PurchaseStatus,
        to: PurchaseStatus,
    ) -> RequestBuilder {
        self.request(Method::PATCH, PURCHASES)
            .query(&[("id", format!("eq.{id}")), ("status", format!("eq.{from}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "status": to, "updated_at": Utc::now() }))
    }

    fn rpc_request(&self, function: &str, prize_id: &str) -> RequestBuilder {
        self.request(Method::POST, &format!("rpc/{function}"))
            .json(&json!({ "p_prize_id": prize_id }))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let response = builder.send().await.map_err(|e| {
            error!(error = %e, "supabase request failed");
            StoreError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "supabase returned an error");
            if status == StatusCode::CONFLICT {
                return Err(StoreError::Duplicate(body));
            }
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    fn first<T>(rows: Vec<T>) -> Result<T, StoreError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("empty representation".into()))
    }
}

#[async_trait]
impl PurchaseStore for SupabaseStore {
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase, StoreError> {
        let rows: Vec<Purchase> = self.send(self.insert_purchase_request(&purchase)).await?;
        let row = Self::first(rows)?;
        debug!(id = %row.id, wallet = %row.wallet, "purchase stored");
        Ok(row)
    }

    async fn get_purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError> {
        let builder = self
            .request(Method::GET, PURCHASES)
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_owned())]);
        let rows: Vec<Purchase> = self.send(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_purchases(&self, filter: PurchaseFilter) -> Result<Vec<Purchase>, StoreError> {
        self.send(self.list_purchases_request(&filter)).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PurchaseStatus,
        to: PurchaseStatus,
    ) -> Result<Purchase, StoreError> {
        let rows: Vec<Purchase> = self.send(self.transition_request(id, from, to)).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(row),
            None => match self.get_purchase(id).await? {
                Some(row) => Err(StoreError::Conflict(format!(
                    "purchase {id} is {}, expected {from}",
                    row.status
                ))),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn decrement_stock(&self, prize_id: &str) -> Result<u32, StoreError> {
        let remaining: Option<u32> = self.send(self.rpc_request("decrement_stock", prize_id)).await?;
        remaining.ok_or_else(|| StoreError::OutOfStock(prize_id.to_owned()))
    }

    async fn increment_stock(&self, prize_id: &str) -> Result<u32, StoreError> {
        let count: Option<u32> = self.send(self.rpc_request("increment_stock", prize_id)).await?;
        count.ok_or(StoreError::NotFound)
    }

    async fn list_stock(&self) -> Result<Vec<StockRecord>, StoreError> {
        let builder = self.request(Method::GET, STOCK).query(&[
            ("select", "prize_id,count,initial_count"),
            ("order", "prize_id.asc"),
        ]);
        self.send(builder).await
    }

    async fn set_stock(&self, prize_id: &str, count: u32) -> Result<StockRecord, StoreError> {
        let record = StockRecord {
            prize_id: prize_id.to_owned(),
            count,
            initial_count: count,
        };
        let builder = self
            .request(Method::POST, STOCK)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&record);
        let rows: Vec<StockRecord> = self.send(builder).await?;
        Self::first(rows)
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let builder = self.request(Method::GET, LEADERBOARD).query(&[
            ("select", "wallet,purchases,total_tokens".to_owned()),
            ("order", "total_tokens.desc".to_owned()),
            ("limit", limit.to_string()),
        ]);
        self.send(builder).await
    }

    fn kind(&self) -> &'static str {
        "supabase"
    }
}
