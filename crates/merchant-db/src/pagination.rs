//! Numeric-cursor pagination for history range scans (4.B), usable for
//! both order history and product history.
//!
//! Row keys are expected to be laid out as `<instance>\0<row_id:u64 BE>`
//! so that sled's natural byte-lexicographic ordering matches insertion
//! order; `row_id` comes from a per-instance monotonic counter tree.

use crate::error::DbError;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy)]
pub enum Direction {
    Forward,
    Backward,
}

pub struct PageRequest {
    pub cursor: Option<u64>,
    pub limit: usize,
    pub direction: Direction,
}

pub fn row_key(instance: &str, row_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(instance.len() + 1 + 8);
    key.extend_from_slice(instance.as_bytes());
    key.push(0);
    key.extend_from_slice(&row_id.to_be_bytes());
    key
}

fn instance_prefix(instance: &str) -> Vec<u8> {
    let mut key = instance.as_bytes().to_vec();
    key.push(0);
    key
}

/// Scans `tree` for rows belonging to `instance`, returning up to
/// `req.limit` deserialized values in the requested direction, anchored
/// after/before `req.cursor`.
pub fn scan_page<T: DeserializeOwned>(
    tree: &sled::Tree,
    instance: &str,
    req: &PageRequest,
) -> Result<Vec<(u64, T)>, DbError> {
    let prefix = instance_prefix(instance);
    let mut out = Vec::new();

    let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> = match req.direction {
        Direction::Forward => Box::new(tree.scan_prefix(&prefix)),
        Direction::Backward => Box::new(tree.scan_prefix(&prefix).rev()),
    };

    for entry in iter {
        let (k, v) = entry?;
        let row_id = u64::from_be_bytes(k[k.len() - 8..].try_into().map_err(|_| DbError::Hard("malformed row key".into()))?);
        if let Some(cursor) = req.cursor {
            let past_cursor = match req.direction {
                Direction::Forward => row_id <= cursor,
                Direction::Backward => row_id >= cursor,
            };
            if past_cursor {
                continue;
            }
        }
        let value: T = serde_json::from_slice(&v)?;
        out.push((row_id, value));
        if out.len() >= req.limit {
            break;
        }
    }
    Ok(out)
}
