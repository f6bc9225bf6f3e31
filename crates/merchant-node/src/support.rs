//! Small helpers shared by the engine modules: mapping storage failures
//! into the §7 error taxonomy and reconstituting an instance's signing
//! keypair from its persisted hex-encoded secret.

use crate::context::AppState;
use merchant_core::{Instance, MerchantError};
use merchant_crypto::KeyPair;
use merchant_db::DbError;

pub fn db_err_to_merchant(err: DbError) -> MerchantError {
    match err {
        DbError::NotFound => MerchantError::NotFound("resource not found".to_string()),
        DbError::Soft(msg) => MerchantError::Internal(format!("storage contention exceeded retry budget: {msg}")),
        DbError::Hard(msg) => MerchantError::Internal(msg),
    }
}

pub fn load_instance(state: &AppState, instance_id: &str) -> Result<Instance, MerchantError> {
    let instance = state.db.get_instance(instance_id).map_err(db_err_to_merchant)?;
    if instance.deleted {
        return Err(MerchantError::NotFound(format!("instance {instance_id} has been deleted")));
    }
    Ok(instance)
}

/// Reconstructs the instance's signing keypair from its stored secret.
/// Absent for a soft-deleted instance — those can no longer sign.
pub fn instance_keypair(instance: &Instance) -> Result<KeyPair, MerchantError> {
    let secret_hex = instance
        .merchant_priv
        .as_deref()
        .ok_or_else(|| MerchantError::Internal(format!("instance {} has no signing key", instance.id)))?;
    let secret = hex::decode(secret_hex).map_err(|e| MerchantError::Internal(format!("corrupt signing key: {e}")))?;
    KeyPair::from_secret_bytes(&secret).map_err(|e| MerchantError::Internal(format!("corrupt signing key: {e}")))
}
