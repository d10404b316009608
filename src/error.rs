use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::response::{ApiResponse, Meta};

/// Failure of a Catalog or Order Ledger backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("invalid quantity for product {0}")]
    InvalidQuantity(Uuid),

    #[error("invalid item for product {product_id}: {reason}")]
    InvalidItem { product_id: Uuid, reason: String },

    #[error("product {0} is not available in the store, please refresh your cart")]
    ProductUnavailable(Uuid),

    #[error("product {0} is not available in the quantity requested")]
    InsufficientStock(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Conflict {0}")]
    Conflict(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Storage error")]
    Store(#[from] StoreError),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EmptyCart
            | CheckoutError::InvalidQuantity(_)
            | CheckoutError::InvalidItem { .. } => AppError::BadRequest(err.to_string()),
            CheckoutError::ProductUnavailable(id) => {
                tracing::debug!(product_id = %id, "checkout referenced unavailable product");
                AppError::NotFound
            }
            CheckoutError::InsufficientStock(_) => AppError::Conflict(err.to_string()),
            CheckoutError::Store(store) => AppError::Store(store),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(inner) => {
                AppError::BadRequest(inner.body_text())
            }
            other => AppError::Internal(anyhow::anyhow!(other.body_text())),
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DbError(_)
            | AppError::OrmError(_)
            | AppError::Store(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        let message = self.to_string();
        let body = ApiResponse {
            message: message.clone(),
            data: Some(ErrorData { error: message }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_errors_map_to_http_statuses() {
        let id = Uuid::new_v4();
        let cases = [
            (CheckoutError::EmptyCart, StatusCode::BAD_REQUEST),
            (CheckoutError::InvalidQuantity(id), StatusCode::BAD_REQUEST),
            (CheckoutError::ProductUnavailable(id), StatusCode::NOT_FOUND),
            (CheckoutError::InsufficientStock(id), StatusCode::CONFLICT),
            (
                CheckoutError::Store(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn malformed_path_id_gets_the_error_envelope() {
        use axum::{Router, body::Body, extract::Path, http::Request, routing::get};
        use tower::ServiceExt;

        async fn show(path: Result<Path<Uuid>, PathRejection>) -> AppResult<String> {
            let Path(id) = path?;
            Ok(id.to_string())
        }

        let app = Router::new().route("/items/{id}", get(show));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/items/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["message"].as_str().unwrap().starts_with("Bad Request"));
        assert!(body["data"]["error"].is_string());
        assert!(body.get("meta").is_some());
    }
}
