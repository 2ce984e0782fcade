//! Catalog gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{CatalogId, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Current catalog data for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub catalog_id: CatalogId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl CatalogProduct {
    /// Creates a catalog product.
    pub fn new(
        catalog_id: impl Into<CatalogId>,
        name: impl Into<String>,
        price: Money,
        stock: u32,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Errors returned by the catalog service.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The service could not be reached or timed out.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// The product is unknown to the catalog.
    #[error("Unknown product: {0}")]
    UnknownProduct(CatalogId),

    /// The catalog refused the decrement.
    #[error("Insufficient stock for {catalog_id}: requested {requested}, available {available}")]
    InsufficientStock {
        catalog_id: CatalogId,
        requested: u32,
        available: u32,
    },
}

/// Request/response client for the external product and inventory system.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Reads the current price, stock and name of a product.
    async fn read(&self, catalog_id: &CatalogId) -> Result<Option<CatalogProduct>, CatalogError>;

    /// Removes `quantity` units from the product's stock.
    async fn decrement(&self, catalog_id: &CatalogId, quantity: u32) -> Result<(), CatalogError>;
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<CatalogId, CatalogProduct>>>,
    fail_on_read: Arc<AtomicBool>,
    fail_on_decrement: Arc<AtomicBool>,
    decrement_calls: Arc<AtomicUsize>,
}

impl InMemoryCatalog {
    /// Creates an empty in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog seeded with products.
    pub fn with_products(products: impl IntoIterator<Item = CatalogProduct>) -> Self {
        let map = products
            .into_iter()
            .map(|p| (p.catalog_id.clone(), p))
            .collect();
        Self {
            products: Arc::new(RwLock::new(map)),
            ..Self::default()
        }
    }

    /// Inserts or replaces a product.
    pub async fn upsert(&self, product: CatalogProduct) {
        self.products
            .write()
            .await
            .insert(product.catalog_id.clone(), product);
    }

    /// Configures the catalog to fail every read.
    pub fn set_fail_on_read(&self, fail: bool) {
        self.fail_on_read.store(fail, Ordering::SeqCst);
    }

    /// Configures the catalog to fail every decrement.
    pub fn set_fail_on_decrement(&self, fail: bool) {
        self.fail_on_decrement.store(fail, Ordering::SeqCst);
    }

    /// Returns the current stock of a product.
    pub async fn stock(&self, catalog_id: &CatalogId) -> Option<u32> {
        self.products.read().await.get(catalog_id).map(|p| p.stock)
    }

    /// Returns how many decrement calls were made, failed ones included.
    pub fn decrement_calls(&self) -> usize {
        self.decrement_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogGateway for InMemoryCatalog {
    async fn read(&self, catalog_id: &CatalogId) -> Result<Option<CatalogProduct>, CatalogError> {
        if self.fail_on_read.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".to_string()));
        }
        Ok(self.products.read().await.get(catalog_id).cloned())
    }

    async fn decrement(&self, catalog_id: &CatalogId, quantity: u32) -> Result<(), CatalogError> {
        self.decrement_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_decrement.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".to_string()));
        }

        let mut products = self.products.write().await;
        let product = products
            .get_mut(catalog_id)
            .ok_or_else(|| CatalogError::UnknownProduct(catalog_id.clone()))?;

        if product.stock < quantity {
            return Err(CatalogError::InsufficientStock {
                catalog_id: catalog_id.clone(),
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        Ok(())
    }
}
