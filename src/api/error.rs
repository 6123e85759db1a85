use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::guard::{ReplayError, UsedTimestampStoreError};
use crate::pricing::PricingError;
use crate::ratelimit::RateLimitDecision;
use crate::settlement::SettlementError;
use crate::signing::SigningError;
use crate::store::StoreError;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict(String),
    RateLimited {
        decision: RateLimitDecision,
        retry_after: u64,
    },
    /// Temporarily unable to accept the request; retrying later may succeed.
    Unavailable(String),
    /// Logged server-side; the client only sees a generic message.
    Internal(String),
}

impl ApiError {
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        let cause = cause.to_string();
        error!(error = %cause, "request failed");
        ApiError::Internal(cause)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg) => msg.clone(),
            ApiError::Unauthorized => "Unauthorized".to_owned(),
            ApiError::RateLimited { .. } => "Too many requests".to_owned(),
            ApiError::Internal(_) => INTERNAL_MESSAGE.to_owned(),
        }
    }
}

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(json!({ "error": self.message() }))).into_response();
        if let ApiError::RateLimited {
            decision,
            retry_after,
        } = &self
        {
            let headers = response.headers_mut();
            apply_rate_limit_headers(headers, decision);
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after));
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PricingError> for ApiError {
    fn from(err: PricingError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::InvalidWallet(_) => ApiError::BadRequest(err.to_string()),
            SigningError::InvalidKey(_) => ApiError::internal(err),
        }
    }
}

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::TooOld | ReplayError::TooFuture => ApiError::BadRequest(err.to_string()),
            ReplayError::ReplayDetected => ApiError::Conflict(err.to_string()),
            ReplayError::Store(UsedTimestampStoreError::Full { capacity }) => {
                warn!(capacity, "replay store full; refusing settlement");
                ApiError::Unavailable("Service busy, retry shortly".to_owned())
            }
            ReplayError::Store(_) => ApiError::internal(err),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Not found".to_owned()),
            StoreError::OutOfStock(_) => ApiError::Conflict(err.to_string()),
            StoreError::Duplicate(_) => ApiError::Conflict("Purchase already recorded".to_owned()),
            StoreError::Conflict(_) => ApiError::Conflict(err.to_string()),
            StoreError::Request(_) | StoreError::Status { .. } | StoreError::Decode(_) => {
                ApiError::internal(err)
            }
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Wallet(e) => e.into(),
            SettlementError::Replay(e) => e.into(),
            SettlementError::Store(e) => e.into(),
            SettlementError::FairnessMismatch
            | SettlementError::AmountMismatch { .. }
            | SettlementError::MissingField(_) => ApiError::BadRequest(err.to_string()),
            SettlementError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(ApiError::from(ReplayError::TooOld).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(ReplayError::TooFuture).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(ReplayError::ReplayDetected).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(StoreError::OutOfStock("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StoreError::Request("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(SettlementError::FairnessMismatch).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SettlementError::AmountMismatch {
                claimed: 1,
                authorized: 2
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ReplayError::Store(UsedTimestampStoreError::Full { capacity: 8 }))
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ReplayError::Store(UsedTimestampStoreError::Backend("x".into())))
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = ApiError::from(StoreError::Status {
            status: 503,
            body: "db password rejected".into(),
        });
        assert_eq!(err.message(), "Internal server error");
    }

    #[test]
    fn rate_limited_response_carries_headers() {
        let resp = ApiError::RateLimited {
            decision: RateLimitDecision {
                allowed: false,
                limit: 5,
                remaining: 0,
                reset_at: 1_060,
            },
            retry_after: 42,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RETRY_AFTER], "42");
        assert_eq!(resp.headers()[X_RATELIMIT_LIMIT], "5");
        assert_eq!(resp.headers()[X_RATELIMIT_REMAINING], "0");
        assert_eq!(resp.headers()[X_RATELIMIT_RESET], "1060");
    }
}
