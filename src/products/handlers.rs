use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Extension,
};
use opentelemetry::Context;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::RequestContext;
use crate::server::response::{respond, ApiResponse};
use crate::server::AppState;

/// `GET /api/products/{id}`
pub async fn get_product(
    State(state): State<AppState>,
    request_context: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::InvalidInput("invalid product ID format".to_string()))?;

    let cx = request_context
        .map(|Extension(rc)| rc.0)
        .unwrap_or_else(Context::new);

    let product = state.products.get_by_id(&cx, id).await?;

    Ok(respond(StatusCode::OK, ApiResponse::success(StatusCode::OK, product)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::products::{InMemoryProductRepository, Product};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(product: Product) -> Router {
        let state = AppState::new(
            "product-service",
            Arc::new(InMemoryProductRepository::with_products([product])),
        );
        Router::new()
            .route("/api/products/{id}", get(get_product))
            .with_state(state)
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_get_existing_product() {
        let product = Product::new("SKU-9", "Lamp", "Desk lamp", 45.0, Uuid::new_v4());
        let (status, json) = call(app(product.clone()), &format!("/api/products/{}", product.id)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["type"], "success");
        assert_eq!(json["data"]["sku"], "SKU-9");
    }

    #[tokio::test]
    async fn test_invalid_uuid_is_bad_request() {
        let product = Product::new("SKU-9", "Lamp", "Desk lamp", 45.0, Uuid::new_v4());
        let (status, json) = call(app(product), "/api/products/not-a-uuid").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["type"], "error");
        assert_eq!(json["errors"][0], "Invalid input: invalid product ID format");
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let product = Product::new("SKU-9", "Lamp", "Desk lamp", 45.0, Uuid::new_v4());
        let (status, json) = call(app(product), &format!("/api/products/{}", Uuid::new_v4())).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Not Found");
    }
}
