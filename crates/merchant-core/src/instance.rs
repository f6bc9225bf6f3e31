//! §3 "Instance" and its bank accounts.

use merchant_crypto::KeyPair;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub payto_uri: String,
    /// Random per-account salt; `h_wire = hash(payto_uri || salt)`.
    pub salt: String,
    pub h_wire: String,
    pub active: bool,
}

impl BankAccount {
    pub fn new(payto_uri: String) -> Self {
        let salt = merchant_crypto::random_salt();
        let h_wire = merchant_crypto::hash_wire(&payto_uri, &salt);
        BankAccount { payto_uri, salt, h_wire, active: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDefaults {
    pub max_wire_fee: String,
    /// Number of wire transfers over which the merchant absorbs wire fees
    /// above `max_wire_fee` before passing the excess back to the
    /// customer — see SPEC_FULL §3 / DESIGN.md's Open Question resolution.
    pub wire_fee_amortization: u32,
    pub max_deposit_fee: String,
    pub wire_transfer_delay_seconds: i64,
    pub pay_delay_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub address: serde_json::Value,
    pub jurisdiction: serde_json::Value,
    /// Public half is always present; `None` once the instance has been
    /// (soft-)deleted, which erases the private key but keeps the audit row.
    pub merchant_pub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_priv: Option<String>,
    pub accounts: Vec<BankAccount>,
    pub defaults: InstanceDefaults,
    pub deleted: bool,
}

impl Instance {
    pub fn new(
        id: String,
        name: String,
        address: serde_json::Value,
        jurisdiction: serde_json::Value,
        defaults: InstanceDefaults,
    ) -> (Self, KeyPair) {
        let keypair = merchant_crypto::KeyPair::generate();
        let instance = Instance {
            id,
            name,
            address,
            jurisdiction,
            merchant_pub: hex::encode(keypair.public_bytes()),
            merchant_priv: Some(hex::encode(keypair.secret_bytes())),
            accounts: Vec::new(),
            defaults,
            deleted: false,
        };
        (instance, keypair)
    }

    pub fn active_account(&self) -> Option<&BankAccount> {
        self.accounts.iter().find(|a| a.active)
    }

    pub fn insert_account(&mut self, account: BankAccount) -> Result<(), String> {
        if self.accounts.iter().any(|a| a.payto_uri == account.payto_uri) {
            return Err(format!("duplicate payto URI {}", account.payto_uri));
        }
        self.accounts.push(account);
        Ok(())
    }

    /// PATCH semantics: a new bank account row is appended and flips active
    /// atomically, the old one is marked inactive — never mutated in place.
    pub fn rotate_active_account(&mut self, new_account: BankAccount) -> Result<(), String> {
        self.insert_account(new_account)?;
        let len = self.accounts.len();
        for (i, a) in self.accounts.iter_mut().enumerate() {
            a.active = i == len - 1;
        }
        Ok(())
    }

    /// Soft delete: erase the private signing key, keep audit rows.
    pub fn soft_delete(&mut self) {
        self.merchant_priv = None;
        self.deleted = true;
    }
}
