//! Flat key/value cart metadata attached to a payment session.
//!
//! Layout: `user_id`, `item_count`, and for each index `i` the keys
//! `item_{i}_id` and `item_{i}_qty`. The provider echoes the map back
//! verbatim in the completion webhook.

use std::collections::BTreeMap;

use common::{CartLine, CatalogId, UserId};
use thiserror::Error;

pub const USER_ID_KEY: &str = "user_id";
pub const ITEM_COUNT_KEY: &str = "item_count";

pub fn item_id_key(index: usize) -> String {
    format!("item_{index}_id")
}

pub fn item_qty_key(index: usize) -> String {
    format!("item_{index}_qty")
}

/// Cart contents recovered from session metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartMetadata {
    pub user_id: UserId,
    pub lines: Vec<CartLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata key {0} is missing")]
    MissingKey(String),

    #[error("metadata key {key} has invalid value {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("item_count is {declared} but {found} indexed items are present")]
    CountMismatch { declared: usize, found: usize },
}

/// Encodes a user's cart lines as session metadata.
pub fn encode(user_id: UserId, lines: &[CartLine]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(USER_ID_KEY.to_string(), user_id.to_string());
    map.insert(ITEM_COUNT_KEY.to_string(), lines.len().to_string());
    for (i, line) in lines.iter().enumerate() {
        map.insert(item_id_key(i), line.catalog_id.to_string());
        map.insert(item_qty_key(i), line.quantity.to_string());
    }
    map
}

/// Decodes session metadata back into cart lines.
///
/// Fails when a key is missing or garbled, or when `item_count` disagrees
/// with the indexed keys actually present.
pub fn decode(map: &BTreeMap<String, String>) -> Result<CartMetadata, MetadataError> {
    let user_raw = required(map, USER_ID_KEY)?;
    let user_id = UserId::parse(user_raw).ok_or_else(|| invalid(USER_ID_KEY, user_raw))?;

    let count_raw = required(map, ITEM_COUNT_KEY)?;
    let declared: usize = count_raw
        .parse()
        .map_err(|_| invalid(ITEM_COUNT_KEY, count_raw))?;

    let found = indexed_item_count(map);
    if found != declared {
        return Err(MetadataError::CountMismatch { declared, found });
    }

    let mut lines = Vec::with_capacity(declared);
    for i in 0..declared {
        let id_key = item_id_key(i);
        let catalog_id = CatalogId::new(required(map, &id_key)?);
        if catalog_id.is_blank() {
            return Err(invalid(&id_key, catalog_id.as_str()));
        }

        let qty_key = item_qty_key(i);
        let qty_raw = required(map, &qty_key)?;
        let quantity: u32 = qty_raw
            .parse()
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| invalid(&qty_key, qty_raw))?;

        lines.push(CartLine {
            catalog_id,
            quantity,
        });
    }

    Ok(CartMetadata { user_id, lines })
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, MetadataError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| MetadataError::MissingKey(key.to_string()))
}

fn invalid(key: &str, value: &str) -> MetadataError {
    MetadataError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Number of distinct indices that carry an `item_{i}_id` or `item_{i}_qty` key.
fn indexed_item_count(map: &BTreeMap<String, String>) -> usize {
    let mut indices: Vec<&str> = map
        .keys()
        .filter_map(|k| k.strip_prefix("item_"))
        .filter_map(|rest| {
            rest.strip_suffix("_id")
                .or_else(|| rest.strip_suffix("_qty"))
        })
        .filter(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices.len()
}
