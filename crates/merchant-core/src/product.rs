//! §3 "Product" and "Stock lock".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// −1 means "infinite stock", matching the wire convention so JSON stays
/// a plain integer instead of an `Option`.
pub const INFINITE_STOCK: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLock {
    pub uuid: Uuid,
    pub expiry: DateTime<Utc>,
    pub quantity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub instance_id: String,
    pub product_id: String,
    pub description: String,
    #[serde(default)]
    pub description_i18n: HashMap<String, String>,
    pub unit: String,
    pub price: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub taxes: Vec<serde_json::Value>,
    pub stocked: i64,
    pub sold: u64,
    pub lost: u64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub next_restock: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locks: Vec<StockLock>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProductError {
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u64, available: i64 },
}

impl Product {
    pub fn new(instance_id: String, product_id: String, description: String, unit: String, price: String, stocked: i64) -> Self {
        Product {
            instance_id,
            product_id,
            description,
            description_i18n: HashMap::new(),
            unit,
            price,
            image: None,
            taxes: Vec::new(),
            stocked,
            sold: 0,
            lost: 0,
            location: None,
            next_restock: None,
            locks: Vec::new(),
        }
    }

    fn active_locked(&self, now: DateTime<Utc>) -> u64 {
        self.locks.iter().filter(|l| l.expiry > now).map(|l| l.quantity).sum()
    }

    pub fn available(&self, now: DateTime<Utc>) -> i64 {
        if self.stocked == INFINITE_STOCK {
            return i64::MAX;
        }
        self.stocked - self.sold as i64 - self.lost as i64 - self.active_locked(now) as i64
    }

    /// Invariant (§8): sum of non-expired locks for a product ≤ available stock.
    pub fn lock_stock(&mut self, quantity: u64, ttl_seconds: i64, now: DateTime<Utc>) -> Result<Uuid, ProductError> {
        self.locks.retain(|l| l.expiry > now);
        let available = self.available(now);
        if self.stocked != INFINITE_STOCK && (quantity as i64) > available {
            return Err(ProductError::InsufficientStock { requested: quantity, available });
        }
        let id = Uuid::new_v4();
        self.locks.push(StockLock {
            uuid: id,
            expiry: now + chrono::Duration::seconds(ttl_seconds),
            quantity,
        });
        Ok(id)
    }

    pub fn release_lock(&mut self, lock_id: Uuid) {
        self.locks.retain(|l| l.uuid != lock_id);
    }

    /// Converts a released lock into a completed sale (pay-side commit).
    pub fn commit_lock_as_sold(&mut self, lock_id: Uuid) {
        if let Some(pos) = self.locks.iter().position(|l| l.uuid == lock_id) {
            let lock = self.locks.remove(pos);
            self.sold += lock.quantity;
        }
    }

    pub fn mark_lost(&mut self, quantity: u64) {
        self.lost += quantity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_respects_available_stock() {
        let mut p = Product::new("i".into(), "p".into(), "d".into(), "unit".into(), "KUDOS:1".into(), 5);
        let now = Utc::now();
        p.lock_stock(3, 60, now).unwrap();
        assert!(p.lock_stock(3, 60, now).is_err());
        assert!(p.lock_stock(2, 60, now).is_ok());
    }

    #[test]
    fn infinite_stock_never_blocks() {
        let mut p = Product::new("i".into(), "p".into(), "d".into(), "unit".into(), "KUDOS:1".into(), INFINITE_STOCK);
        let now = Utc::now();
        assert!(p.lock_stock(1_000_000, 60, now).is_ok());
    }

    #[test]
    fn expired_locks_free_stock() {
        let mut p = Product::new("i".into(), "p".into(), "d".into(), "unit".into(), "KUDOS:1".into(), 5);
        let now = Utc::now();
        p.lock_stock(5, -1, now).unwrap(); // already expired
        assert_eq!(p.available(now), 5);
    }
}
