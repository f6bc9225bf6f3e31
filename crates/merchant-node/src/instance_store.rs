//! 4.E Instance/Inventory Store: multi-tenant instance CRUD, per-instance
//! bank accounts, product inventory, and stock locks.

use crate::context::AppState;
use crate::support::db_err_to_merchant;
use chrono::Utc;
use merchant_core::{BankAccount, Instance, InstanceDefaults, MerchantError, Product, ProductError};
use serde::Deserialize;
use uuid::Uuid;

/// Never echoes `merchant_priv` back over HTTP — the private key is
/// write-only from the API's perspective once generated.
fn redact(mut instance: Instance) -> Instance {
    instance.merchant_priv = None;
    instance
}

pub fn create_instance(
    state: &AppState,
    id: String,
    name: String,
    address: serde_json::Value,
    jurisdiction: serde_json::Value,
    defaults: InstanceDefaults,
    payto_uri: Option<String>,
) -> Result<Instance, MerchantError> {
    if state.db.get_instance(&id).is_ok() {
        return Err(MerchantError::Conflict(format!("instance {id} already exists")));
    }
    let (mut instance, _keypair) = Instance::new(id, name, address, jurisdiction, defaults);
    if let Some(uri) = payto_uri {
        instance.insert_account(BankAccount::new(uri)).map_err(MerchantError::BadRequest)?;
    }
    state.db.put_instance(&instance).map_err(db_err_to_merchant)?;
    Ok(redact(instance))
}

pub fn get_instance(state: &AppState, id: &str) -> Result<Instance, MerchantError> {
    let instance = state.db.get_instance(id).map_err(db_err_to_merchant)?;
    if instance.deleted {
        return Err(MerchantError::NotFound(format!("instance {id}")));
    }
    Ok(redact(instance))
}

pub fn list_instances(state: &AppState) -> Result<Vec<Instance>, MerchantError> {
    let instances = state.db.list_instances().map_err(db_err_to_merchant)?;
    Ok(instances.into_iter().filter(|i| !i.deleted).map(redact).collect())
}

#[derive(Debug, Default, Deserialize)]
pub struct InstancePatch {
    pub name: Option<String>,
    pub address: Option<serde_json::Value>,
    pub jurisdiction: Option<serde_json::Value>,
    pub defaults: Option<InstanceDefaults>,
    pub new_payto_uri: Option<String>,
}

/// PATCH semantics (§3, §5): a new bank account row is appended and
/// flips active atomically; the old one is marked inactive, never mutated.
pub fn patch_instance(state: &AppState, id: &str, patch: InstancePatch) -> Result<Instance, MerchantError> {
    let mut instance = state.db.get_instance(id).map_err(db_err_to_merchant)?;
    if instance.deleted {
        return Err(MerchantError::NotFound(format!("instance {id}")));
    }
    if let Some(name) = patch.name {
        instance.name = name;
    }
    if let Some(address) = patch.address {
        instance.address = address;
    }
    if let Some(jurisdiction) = patch.jurisdiction {
        instance.jurisdiction = jurisdiction;
    }
    if let Some(defaults) = patch.defaults {
        instance.defaults = defaults;
    }
    if let Some(uri) = patch.new_payto_uri {
        instance.rotate_active_account(BankAccount::new(uri)).map_err(MerchantError::BadRequest)?;
    }
    state.db.put_instance(&instance).map_err(db_err_to_merchant)?;
    Ok(redact(instance))
}

/// DELETE (§3): soft-delete — erase the signing private key, keep audit rows.
pub fn delete_instance(state: &AppState, id: &str) -> Result<(), MerchantError> {
    let mut instance = state.db.get_instance(id).map_err(db_err_to_merchant)?;
    instance.soft_delete();
    state.db.put_instance(&instance).map_err(db_err_to_merchant)?;
    Ok(())
}

/// PURGE (§3): hard-remove, no audit rows kept.
pub fn purge_instance(state: &AppState, id: &str) -> Result<(), MerchantError> {
    state.db.purge_instance(id).map_err(db_err_to_merchant)
}

// ---- Products -------------------------------------------------------

pub fn create_product(
    state: &AppState,
    instance_id: &str,
    product_id: String,
    description: String,
    unit: String,
    price: String,
    stocked: i64,
) -> Result<Product, MerchantError> {
    get_instance(state, instance_id)?;
    if state.db.get_product(instance_id, &product_id).is_ok() {
        return Err(MerchantError::Conflict(format!("product {product_id} already exists")));
    }
    let product = Product::new(instance_id.to_string(), product_id, description, unit, price, stocked);
    state.db.put_product(&product).map_err(db_err_to_merchant)?;
    Ok(product)
}

pub fn get_product(state: &AppState, instance_id: &str, product_id: &str) -> Result<Product, MerchantError> {
    state.db.get_product(instance_id, product_id).map_err(db_err_to_merchant)
}

pub fn list_products(state: &AppState, instance_id: &str) -> Result<Vec<Product>, MerchantError> {
    state.db.list_products(instance_id).map_err(db_err_to_merchant)
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductPatch {
    pub description: Option<String>,
    pub price: Option<String>,
    pub stocked: Option<i64>,
    pub location: Option<String>,
    pub next_restock: Option<chrono::DateTime<Utc>>,
}

pub fn patch_product(state: &AppState, instance_id: &str, product_id: &str, patch: ProductPatch) -> Result<Product, MerchantError> {
    let mut product = state.db.get_product(instance_id, product_id).map_err(db_err_to_merchant)?;
    if let Some(d) = patch.description {
        product.description = d;
    }
    if let Some(p) = patch.price {
        product.price = p;
    }
    if let Some(s) = patch.stocked {
        product.stocked = s;
    }
    if let Some(l) = patch.location {
        product.location = Some(l);
    }
    if let Some(r) = patch.next_restock {
        product.next_restock = Some(r);
    }
    state.db.put_product(&product).map_err(db_err_to_merchant)?;
    Ok(product)
}

pub fn delete_product(state: &AppState, instance_id: &str, product_id: &str) -> Result<(), MerchantError> {
    state.db.delete_product(instance_id, product_id).map_err(db_err_to_merchant)
}

/// `POST /products/{id}/lock` (§3 "Stock lock", §5 "row-level locking via
/// the database"): the closure runs inside `with_product_tx`'s sled
/// transaction, so concurrent lock attempts against the same product
/// serialize through sled rather than racing on a read-modify-write.
pub fn lock_stock(state: &AppState, instance_id: &str, product_id: &str, quantity: u64, ttl_seconds: i64) -> Result<Uuid, MerchantError> {
    let now = Utc::now();
    let lock_id = std::sync::Mutex::new(None);
    state
        .db
        .with_product_tx(instance_id, product_id, |product| {
            let id = product.lock_stock(quantity, ttl_seconds, now).map_err(|e| match e {
                ProductError::InsufficientStock { requested, available } => {
                    format!("insufficient stock: requested {requested}, available {available}")
                }
            })?;
            *lock_id.lock().unwrap_or_else(|p| p.into_inner()) = Some(id);
            Ok(())
        })
        .map_err(|e| match e {
            merchant_db::DbError::Soft(msg) if msg.contains("insufficient stock") => MerchantError::Forbidden(msg),
            other => db_err_to_merchant(other),
        })?;
    lock_id.into_inner().unwrap_or_else(|p| p.into_inner()).ok_or_else(|| MerchantError::Internal("stock lock committed without an id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MerchantMetrics;
    use clap::Parser;
    use merchant_db::MerchantDb;
    use merchant_exchange_client::ExchangeClient;
    use merchant_keystate::{KeyStateConfig, KeyStateManager};
    use std::sync::Arc;

    fn test_state(dir: &std::path::Path) -> AppState {
        let db = Arc::new(MerchantDb::open(dir).unwrap());
        let client = ExchangeClient::new();
        let keystate = Arc::new(KeyStateManager::new(
            client.clone(),
            KeyStateConfig { require_auditor: false, accepted_auditors: vec![], key_lookahead: chrono::Duration::hours(1) },
        ));
        let config = Arc::new(Config::parse_from(["merchant-node"]));
        AppState { db, keystate, exchange_client: client, metrics: Arc::new(MerchantMetrics::new()), config }
    }

    fn defaults() -> InstanceDefaults {
        InstanceDefaults {
            max_wire_fee: "KUDOS:1".into(),
            wire_fee_amortization: 1,
            max_deposit_fee: "KUDOS:1".into(),
            wire_transfer_delay_seconds: 3600,
            pay_delay_seconds: 3600,
        }
    }

    #[test]
    fn create_instance_never_leaks_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let instance = create_instance(&state, "default".into(), "Shop".into(), serde_json::json!({}), serde_json::json!({}), defaults(), None).unwrap();
        assert!(instance.merchant_priv.is_none());
    }

    #[test]
    fn duplicate_instance_id_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        create_instance(&state, "default".into(), "Shop".into(), serde_json::json!({}), serde_json::json!({}), defaults(), None).unwrap();
        let err = create_instance(&state, "default".into(), "Shop2".into(), serde_json::json!({}), serde_json::json!({}), defaults(), None).unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn soft_deleted_instance_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        create_instance(&state, "default".into(), "Shop".into(), serde_json::json!({}), serde_json::json!({}), defaults(), None).unwrap();
        delete_instance(&state, "default").unwrap();
        let err = get_instance(&state, "default").unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn stock_lock_rejects_over_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        create_instance(&state, "default".into(), "Shop".into(), serde_json::json!({}), serde_json::json!({}), defaults(), None).unwrap();
        create_product(&state, "default", "p1".into(), "widget".into(), "each".into(), "KUDOS:1".into(), 5).unwrap();

        lock_stock(&state, "default", "p1", 3, 60).unwrap();
        let err = lock_stock(&state, "default", "p1", 3, 60).unwrap_err();
        assert_eq!(err.http_status(), 403);
    }
}
