//! 4.C Key-State Manager: one reference-counted snapshot per known
//! exchange, atomically swapped in by the reload coordinator in
//! [`reload`]. Readers only ever clone an `Arc`, so a concurrent reload
//! never invalidates in-flight reads (§5 "copy-on-write snapshots with
//! atomic pointer swap").

pub mod reload;

use chrono::{DateTime, Utc};
use merchant_core::{Auditor, DenominationKey, DenominationUse, ExchangeKeySnapshot};
use merchant_exchange_client::{ExchangeClient, ExchangeClientError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStateError {
    #[error("exchange {0} is unknown and no snapshot could be fetched: {1}")]
    Unfetchable(String, String),
    #[error("denomination not trusted or not valid for requested use")]
    UntrustedDenomination,
}

/// Whether a denomination also needs an accepted auditor's signature.
#[derive(Clone)]
pub struct KeyStateConfig {
    pub require_auditor: bool,
    pub accepted_auditors: Vec<Auditor>,
    /// How far ahead of the earliest key expiry we proactively refetch.
    pub key_lookahead: chrono::Duration,
}

pub struct KeyStateManager {
    exchanges: RwLock<HashMap<String, Arc<ExchangeKeySnapshot>>>,
    client: ExchangeClient,
    config: KeyStateConfig,
}

impl KeyStateManager {
    pub fn new(client: ExchangeClient, config: KeyStateConfig) -> Self {
        KeyStateManager {
            exchanges: RwLock::new(HashMap::new()),
            client,
            config,
        }
    }

    /// Reader entry point: returns the currently cached snapshot, bumping
    /// its reference count, or `None` if none has been fetched yet.
    pub fn snapshot(&self, exchange_url: &str) -> Option<Arc<ExchangeKeySnapshot>> {
        self.exchanges.read().unwrap_or_else(|p| p.into_inner()).get(exchange_url).cloned()
    }

    /// Whether the current snapshot needs a refetch: missing, or its
    /// earliest denomination key has expired (4.C).
    pub fn needs_reload(&self, exchange_url: &str, now: DateTime<Utc>) -> bool {
        match self.snapshot(exchange_url) {
            None => true,
            Some(snap) => match snap.earliest_expiry() {
                None => true,
                Some(expiry) => now >= expiry - self.config.key_lookahead,
            },
        }
    }

    /// Fetches `/keys`, validates master + auditor signatures, and
    /// atomically installs the new snapshot. Expired denominations that
    /// are no longer in the new set but exist in the old one are carried
    /// forward into `historic_denominations` so audits/refunds keep working.
    pub async fn reload(&self, exchange_url: &str, deadline: Duration) -> Result<Arc<ExchangeKeySnapshot>, KeyStateError> {
        let mut fetched = self
            .client
            .get_keys(exchange_url, deadline)
            .await
            .map_err(|e| KeyStateError::Unfetchable(exchange_url.to_string(), e.to_string()))?;

        if self.config.require_auditor {
            fetched.denominations.retain(|d| self.is_trusted(d));
        }

        if let Some(previous) = self.snapshot(exchange_url) {
            let new_pubs: std::collections::HashSet<&str> =
                fetched.denominations.iter().map(|d| d.denom_pub.as_str()).collect();
            let mut carried: Vec<DenominationKey> = previous
                .denominations
                .iter()
                .filter(|d| !new_pubs.contains(d.denom_pub.as_str()))
                .cloned()
                .collect();
            carried.extend(previous.historic_denominations.iter().cloned());
            fetched.historic_denominations = carried;
        }

        let snapshot = Arc::new(fetched);
        self.exchanges
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(exchange_url.to_string(), snapshot.clone());
        tracing::info!(%exchange_url, denominations = snapshot.denominations.len(), "key-state snapshot reloaded");
        Ok(snapshot)
    }

    /// A denomination is trusted if master-signed AND (auditing not
    /// required OR at least one accepted auditor's signature is present).
    fn is_trusted(&self, denom: &DenominationKey) -> bool {
        if !self.config.require_auditor {
            return true;
        }
        denom
            .auditor_sigs
            .iter()
            .any(|name| self.config.accepted_auditors.iter().any(|a| &a.name == name))
    }

    pub async fn find_denomination(
        &self,
        exchange_url: &str,
        denom_pub: &str,
        use_: DenominationUse,
        now: DateTime<Utc>,
        deadline: Duration,
    ) -> Result<DenominationKey, KeyStateError> {
        if self.needs_reload(exchange_url, now) {
            self.reload(exchange_url, deadline).await?;
        }
        let snapshot = self
            .snapshot(exchange_url)
            .ok_or_else(|| KeyStateError::Unfetchable(exchange_url.to_string(), "no snapshot cached".into()))?;
        snapshot
            .find_denomination(denom_pub, use_, now)
            .cloned()
            .ok_or(KeyStateError::UntrustedDenomination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auditor(name: &str) -> Auditor {
        Auditor { name: name.to_string(), public_key: "pub".into(), url: "https://auditor".into() }
    }

    #[test]
    fn trust_requires_auditor_sig_when_configured() {
        let mgr = KeyStateManager::new(
            ExchangeClient::new(),
            KeyStateConfig {
                require_auditor: true,
                accepted_auditors: vec![auditor("trusty")],
                key_lookahead: chrono::Duration::hours(1),
            },
        );
        let now = Utc::now();
        let trusted = DenominationKey {
            denom_pub: "d1".into(),
            value: "KUDOS:1".into(),
            fee_withdraw: "KUDOS:0".into(),
            fee_deposit: "KUDOS:0".into(),
            fee_refresh: "KUDOS:0".into(),
            fee_refund: "KUDOS:0".into(),
            start: now - chrono::Duration::days(1),
            withdraw_expire: now + chrono::Duration::days(1),
            spend_expire: now + chrono::Duration::days(2),
            legal_expire: now + chrono::Duration::days(365),
            master_sig: "sig".into(),
            auditor_sigs: vec!["trusty".into()],
        };
        let untrusted = DenominationKey { auditor_sigs: vec![], denom_pub: "d2".into(), ..trusted.clone() };
        assert!(mgr.is_trusted(&trusted));
        assert!(!mgr.is_trusted(&untrusted));
    }
}
