//! Product storage seam
//!
//! Persistence is reached only through [`ProductRepository`]. The
//! [`TracedProductRepository`] decorator opens a child span around every call
//! of the repository it wraps.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::observability::TelemetryHandle;

use super::model::Product;

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// `cx` carries the caller's span so stores can parent their own spans.
    async fn get_by_id(&self, cx: &Context, id: Uuid) -> Result<Product, RepositoryError>;
}

/// Process-local store used by the service binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<Uuid, Product>>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: RwLock::new(products.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    /// Load the catalogue from a JSON file (see [`Self::from_seed_json`]).
    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read product catalog {}: {}", path.display(), e))?;
        Self::from_seed_json(&raw)
            .map_err(|e| anyhow!("Invalid product catalog {}: {}", path.display(), e))
    }

    /// Parse a JSON array of products. Entries without an `id` get a fresh one.
    pub fn from_seed_json(raw: &str) -> Result<Self> {
        let seeds: Vec<ProductSeed> = serde_json::from_str(raw)?;
        Ok(Self::with_products(seeds.into_iter().map(ProductSeed::into_product)))
    }
}

#[derive(Debug, Deserialize)]
struct ProductSeed {
    #[serde(default)]
    id: Option<Uuid>,
    sku: String,
    name: String,
    #[serde(default)]
    description: String,
    price: f64,
    category_id: Uuid,
}

impl ProductSeed {
    fn into_product(self) -> Product {
        let mut product = Product::new(self.sku, self.name, self.description, self.price, self.category_id);
        if let Some(id) = self.id {
            product.id = id;
        }
        product
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn get_by_id(&self, _cx: &Context, id: Uuid) -> Result<Product, RepositoryError> {
        self.products
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }
}

/// Wraps a repository with one child span per call.
pub struct TracedProductRepository<R> {
    inner: R,
    telemetry: TelemetryHandle,
}

impl<R> TracedProductRepository<R> {
    pub fn new(inner: R, telemetry: TelemetryHandle) -> Self {
        Self { inner, telemetry }
    }
}

#[async_trait]
impl<R: ProductRepository> ProductRepository for TracedProductRepository<R> {
    async fn get_by_id(&self, cx: &Context, id: Uuid) -> Result<Product, RepositoryError> {
        let child = self.telemetry.start_span(
            cx,
            "ProductRepository.GetByID",
            SpanKind::Internal,
            vec![KeyValue::new("product.id", id.to_string())],
        );

        let result = self.inner.get_by_id(&child, id).await;

        let span = child.span();
        match &result {
            Ok(_) => span.set_status(Status::Ok),
            // A missing product is an answer, not a store failure.
            Err(RepositoryError::NotFound(_)) => {
                span.set_attribute(KeyValue::new("product.found", false));
            }
        }
        span.end();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let product = Product::new("SKU-1", "Kettle", "Stainless", 29.5, Uuid::new_v4());
        let repo = InMemoryProductRepository::with_products([product.clone()]);

        let found = repo.get_by_id(&Context::new(), product.id).await.unwrap();
        assert_eq!(found, product);

        let missing = Uuid::new_v4();
        let err = repo.get_by_id(&Context::new(), missing).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_seed_json_keeps_given_ids() {
        let id = Uuid::parse_str("6f1c2a9e-3d4b-4c1a-9f7e-2b8d5e0a1c33").unwrap();
        let raw = format!(
            r#"[
                {{"id": "{id}", "sku": "SKU-10", "name": "Teapot", "price": 18.0,
                  "category_id": "{category}"}},
                {{"sku": "SKU-11", "name": "Cup", "description": "Glass", "price": 4.5,
                  "category_id": "{category}"}}
            ]"#,
            category = Uuid::new_v4()
        );

        let repo = InMemoryProductRepository::from_seed_json(&raw).unwrap();
        let teapot = repo.get_by_id(&Context::new(), id).await.unwrap();
        assert_eq!(teapot.sku, "SKU-10");
        assert_eq!(teapot.description, "");
        assert_eq!(repo.products.read().await.len(), 2);
    }

    #[test]
    fn test_seed_errors_name_the_file() {
        let err = InMemoryProductRepository::from_seed_json(r#"[{"sku": "SKU-12"}]"#).err().unwrap();
        assert!(err.to_string().contains("missing field"));

        let missing = Path::new("/nonexistent/products.json");
        let err = InMemoryProductRepository::from_seed_file(missing).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/products.json"));
    }

    #[test]
    fn test_seed_file_on_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"[{"sku": "SKU-13", "name": "Tray", "price": 9.0,
                 "category_id": "0b5e7c44-8a1f-4f57-b0a5-8d0f3c6a2e11"}]"#,
        )
        .unwrap();

        let repo = InMemoryProductRepository::from_seed_file(file.path()).unwrap();
        assert_eq!(repo.products.try_read().unwrap().len(), 1);
    }
}
