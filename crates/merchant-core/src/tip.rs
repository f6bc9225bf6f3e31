//! §3 "Tip reserve" and "Tip".

use crate::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipReserve {
    pub instance_id: String,
    pub reserve_pub: String,
    pub exchange_url: String,
    pub authorized: Amount,
    pub picked_up: Amount,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TipReserveError {
    #[error("reserve is expired")]
    Expired,
    #[error("reserve has insufficient funds: remaining {remaining}, requested {requested}")]
    Insufficient { remaining: String, requested: String },
}

impl TipReserve {
    pub fn remaining(&self) -> Amount {
        self.authorized.saturating_sub(&self.picked_up)
    }

    pub fn debit(&mut self, amount: &Amount, now: DateTime<Utc>) -> Result<(), TipReserveError> {
        if now >= self.expiration {
            return Err(TipReserveError::Expired);
        }
        let remaining = self.remaining();
        if amount > &remaining {
            return Err(TipReserveError::Insufficient {
                remaining: remaining.to_string(),
                requested: amount.to_string(),
            });
        }
        self.picked_up = self.picked_up.checked_add(amount).map_err(|_| TipReserveError::Insufficient {
            remaining: remaining.to_string(),
            requested: amount.to_string(),
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tip {
    pub instance_id: String,
    pub tip_id: String,
    pub reserve_pub: String,
    pub total: Amount,
    pub remaining: Amount,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TipPickupError {
    #[error("tip is expired")]
    Expired,
    #[error("tip has insufficient remaining balance")]
    Insufficient,
}

impl Tip {
    /// Debits `amount` from the tip's remaining balance; callers must roll
    /// back (re-credit) on any downstream withdraw failure (4.H, all-or-nothing).
    pub fn debit(&mut self, amount: &Amount, now: DateTime<Utc>) -> Result<(), TipPickupError> {
        if now >= self.expiration {
            return Err(TipPickupError::Expired);
        }
        if amount > &self.remaining {
            return Err(TipPickupError::Insufficient);
        }
        self.remaining = self.remaining.saturating_sub(amount);
        Ok(())
    }

    pub fn credit(&mut self, amount: &Amount) {
        self.remaining = self.remaining.checked_add(amount).unwrap_or_else(|_| self.total.clone());
    }
}
