//! Client-supplied cart lines.

use serde::{Deserialize, Serialize};

use crate::types::CatalogId;

/// One line of a cart: a catalog product and how many of it.
///
/// Quantity must be greater than zero; the pricing validator rejects
/// lines that violate this before anything is priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub catalog_id: CatalogId,
    pub quantity: u32,
}

impl CartLine {
    /// Creates a cart line.
    pub fn new(catalog_id: impl Into<CatalogId>, quantity: u32) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_line_json_shape() {
        let line = CartLine::new("P1", 2);
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json, serde_json::json!({"catalog_id": "P1", "quantity": 2}));
    }
}
