//! §3 "Key-state snapshot" data model. The caching/reload behavior lives
//! in the `merchant-keystate` crate; this crate only owns the shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenominationUse {
    Withdraw,
    Deposit,
    Refresh,
    Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenominationKey {
    pub denom_pub: String,
    pub value: String,
    pub fee_withdraw: String,
    pub fee_deposit: String,
    pub fee_refresh: String,
    pub fee_refund: String,
    pub start: DateTime<Utc>,
    pub withdraw_expire: DateTime<Utc>,
    pub spend_expire: DateTime<Utc>,
    pub legal_expire: DateTime<Utc>,
    pub master_sig: String,
    /// Names of auditors whose cross-signature over this denomination has
    /// been verified. Empty if none (or if auditing isn't required).
    pub auditor_sigs: Vec<String>,
}

impl DenominationKey {
    /// Returns whether `now` falls inside the validity window for `use_`.
    pub fn valid_for(&self, use_: DenominationUse, now: DateTime<Utc>) -> bool {
        if now < self.start {
            return false;
        }
        let expire = match use_ {
            DenominationUse::Withdraw => self.withdraw_expire,
            DenominationUse::Deposit => self.spend_expire,
            DenominationUse::Refresh => self.spend_expire,
            DenominationUse::Refund => self.spend_expire,
        };
        now < expire
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub pub_key: String,
    pub start: DateTime<Utc>,
    pub expire: DateTime<Utc>,
    pub master_sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auditor {
    pub name: String,
    pub public_key: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeKeySnapshot {
    pub exchange_url: String,
    pub master_pub: String,
    pub denominations: Vec<DenominationKey>,
    /// Denominations whose validity window has fully lapsed but which
    /// still underlie committed deposits — kept for audits/refunds (4.C).
    pub historic_denominations: Vec<DenominationKey>,
    pub signing_keys: Vec<SigningKey>,
    pub combined_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl ExchangeKeySnapshot {
    pub fn find_denomination(&self, denom_pub: &str, use_: DenominationUse, now: DateTime<Utc>) -> Option<&DenominationKey> {
        self.denominations
            .iter()
            .find(|d| d.denom_pub == denom_pub && d.valid_for(use_, now))
    }

    /// The most recent signing key whose start ≤ now and whose expire > now.
    pub fn current_signing_key(&self, now: DateTime<Utc>) -> Option<&SigningKey> {
        self.signing_keys
            .iter()
            .filter(|k| k.start <= now && k.expire > now)
            .max_by_key(|k| k.start)
    }

    /// Earliest-expiring denomination key still tracked; drives the
    /// "refetch when the current snapshot's earliest key has expired"
    /// trigger in 4.C.
    pub fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.denominations.iter().map(|d| d.spend_expire).min()
    }
}
