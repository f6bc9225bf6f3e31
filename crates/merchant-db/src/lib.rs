//! 4.B Persistence Layer: a transactional store of instances, products,
//! orders, deposits, refunds, tips, and wire reconciliations, backed by
//! `sled` — one `Tree` per entity, opened with a lock precheck.

pub mod error;
pub mod notify;
pub mod pagination;
pub mod retry;

pub use error::DbError;
pub use notify::NotifierRegistry;
pub use pagination::{scan_page, Direction, PageRequest};
pub use retry::{with_retry, DEFAULT_MAX_ATTEMPTS};

use merchant_core::{
    Deposit, ExchangeKeySnapshot, Instance, Order, Product, RefundRecord, Tip, TipReserve,
    WireTransferRecord,
};
use serde::{Deserialize, Serialize};
use sled::Transactional;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const TREE_INSTANCES: &str = "instances";
const TREE_PRODUCTS: &str = "products";
const TREE_ORDERS: &str = "orders";
const TREE_ORDER_HISTORY: &str = "order_history";
const TREE_DEPOSITS: &str = "deposits";
const TREE_REFUNDS: &str = "refunds";
const TREE_TIP_RESERVES: &str = "tip_reserves";
const TREE_TIPS: &str = "tips";
const TREE_WIRE_TRANSFERS: &str = "wire_transfers";
const TREE_WIRE_ORDER_INDEX: &str = "wire_order_index";
const TREE_DEPOSIT_BY_COIN: &str = "deposit_by_coin";
const TREE_IDEMPOTENCY: &str = "idempotency";
const TREE_KEY_SNAPSHOTS: &str = "key_snapshots";
const TREE_COUNTERS: &str = "counters";

#[derive(Serialize, Deserialize)]
struct StoredReply {
    status: u16,
    body: Vec<u8>,
}

pub struct MerchantDb {
    db: sled::Db,
    instances: sled::Tree,
    products: sled::Tree,
    orders: sled::Tree,
    order_history: sled::Tree,
    deposits: sled::Tree,
    refunds: sled::Tree,
    tip_reserves: sled::Tree,
    tips: sled::Tree,
    wire_transfers: sled::Tree,
    wire_order_index: sled::Tree,
    deposit_by_coin: sled::Tree,
    idempotency: sled::Tree,
    key_snapshots: sled::Tree,
    counters: sled::Tree,
    order_row_seq: AtomicU64,
    pub notifier: NotifierRegistry,
}

impl MerchantDb {
    #[cfg(unix)]
    fn is_db_lock_available(path: &Path) -> Result<bool, DbError> {
        let db_file = path.join("db");
        if !db_file.exists() {
            return Ok(true);
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(&db_file)
            .map_err(|e| DbError::Hard(format!("cannot open db file for lock check: {e}")))?;
        let fd = file.as_raw_fd();
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            unsafe { libc::flock(fd, libc::LOCK_UN) };
            Ok(true)
        } else {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                Ok(false)
            } else {
                Err(DbError::Hard(format!("flock probe failed: {err}")))
            }
        }
    }

    #[cfg(not(unix))]
    fn is_db_lock_available(_path: &Path) -> Result<bool, DbError> {
        Ok(true)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path_ref = path.as_ref();
        if !Self::is_db_lock_available(path_ref)? {
            return Err(DbError::Hard(format!(
                "database lock held by another merchant-node process at {}",
                path_ref.display()
            )));
        }
        let db = sled::open(path_ref)?;
        let instances = db.open_tree(TREE_INSTANCES)?;
        let products = db.open_tree(TREE_PRODUCTS)?;
        let orders = db.open_tree(TREE_ORDERS)?;
        let order_history = db.open_tree(TREE_ORDER_HISTORY)?;
        let deposits = db.open_tree(TREE_DEPOSITS)?;
        let refunds = db.open_tree(TREE_REFUNDS)?;
        let tip_reserves = db.open_tree(TREE_TIP_RESERVES)?;
        let tips = db.open_tree(TREE_TIPS)?;
        let wire_transfers = db.open_tree(TREE_WIRE_TRANSFERS)?;
        let wire_order_index = db.open_tree(TREE_WIRE_ORDER_INDEX)?;
        let deposit_by_coin = db.open_tree(TREE_DEPOSIT_BY_COIN)?;
        let idempotency = db.open_tree(TREE_IDEMPOTENCY)?;
        let key_snapshots = db.open_tree(TREE_KEY_SNAPSHOTS)?;
        let counters = db.open_tree(TREE_COUNTERS)?;

        let seq = counters
            .get(b"order_row_seq")?
            .map(|v| u64::from_be_bytes(v.as_ref().try_into().unwrap_or_default()))
            .unwrap_or(0);

        Ok(MerchantDb {
            db,
            instances,
            products,
            orders,
            order_history,
            deposits,
            refunds,
            tip_reserves,
            tips,
            wire_transfers,
            wire_order_index,
            deposit_by_coin,
            idempotency,
            key_snapshots,
            counters,
            order_row_seq: AtomicU64::new(seq),
            notifier: NotifierRegistry::new(),
        })
    }

    fn next_order_row(&self) -> Result<u64, DbError> {
        let row = self.order_row_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.insert(b"order_row_seq", &row.to_be_bytes())?;
        Ok(row)
    }

    // ---- Instances --------------------------------------------------

    pub fn get_instance(&self, id: &str) -> Result<Instance, DbError> {
        let bytes = self.instances.get(id)?.ok_or(DbError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn put_instance(&self, instance: &Instance) -> Result<(), DbError> {
        let bytes = serde_json::to_vec(instance)?;
        self.instances.insert(instance.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>, DbError> {
        let mut out = Vec::new();
        for entry in self.instances.iter() {
            let (_, v) = entry?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    pub fn purge_instance(&self, id: &str) -> Result<(), DbError> {
        self.instances.remove(id)?;
        Ok(())
    }

    // ---- Products -----------------------------------------------------

    fn product_key(instance: &str, product_id: &str) -> Vec<u8> {
        format!("{instance}\0{product_id}").into_bytes()
    }

    pub fn get_product(&self, instance: &str, product_id: &str) -> Result<Product, DbError> {
        let key = Self::product_key(instance, product_id);
        let bytes = self.products.get(key)?.ok_or(DbError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn put_product(&self, product: &Product) -> Result<(), DbError> {
        let key = Self::product_key(&product.instance_id, &product.product_id);
        let bytes = serde_json::to_vec(product)?;
        self.products.insert(key, bytes)?;
        Ok(())
    }

    pub fn delete_product(&self, instance: &str, product_id: &str) -> Result<(), DbError> {
        self.products.remove(Self::product_key(instance, product_id))?;
        Ok(())
    }

    pub fn list_products(&self, instance: &str) -> Result<Vec<Product>, DbError> {
        let prefix = format!("{instance}\0");
        let mut out = Vec::new();
        for entry in self.products.scan_prefix(prefix.as_bytes()) {
            let (_, v) = entry?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    /// Transactional read-modify-write for stock locking (§5 "row-level
    /// locking via the database"): sled's tree-transaction retries the
    /// closure internally on conflict, surfacing an abort as a soft error.
    pub fn with_product_tx<F>(&self, instance: &str, product_id: &str, f: F) -> Result<(), DbError>
    where
        F: Fn(&mut Product) -> Result<(), String>,
    {
        let key = Self::product_key(instance, product_id);
        let result = self.products.transaction(|tree| {
            let current = tree
                .get(&key)?
                .ok_or_else(|| sled::transaction::ConflictableTransactionError::Abort("product not found".to_string()))?;
            let mut product: Product = serde_json::from_slice(&current)
                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e.to_string()))?;
            f(&mut product).map_err(sled::transaction::ConflictableTransactionError::Abort)?;
            let bytes = serde_json::to_vec(&product)
                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e.to_string()))?;
            tree.insert(&key, bytes)?;
            Ok(())
        });
        result.map_err(DbError::from)
    }

    // ---- Orders ---------------------------------------------------------

    fn order_key(instance: &str, order_id: &str) -> Vec<u8> {
        format!("{instance}\0{order_id}").into_bytes()
    }

    pub fn get_order(&self, instance: &str, order_id: &str) -> Result<Order, DbError> {
        let key = Self::order_key(instance, order_id);
        let bytes = self.orders.get(key)?.ok_or(DbError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn try_get_order(&self, instance: &str, order_id: &str) -> Result<Option<Order>, DbError> {
        match self.get_order(instance, order_id) {
            Ok(o) => Ok(Some(o)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn put_order(&self, order: &Order) -> Result<(), DbError> {
        let key = Self::order_key(&order.instance_id, &order.order_id);
        let bytes = serde_json::to_vec(order)?;
        self.orders.insert(&key, bytes)?;
        let row = self.next_order_row()?;
        self.order_history.insert(pagination::row_key(&order.instance_id, row), serde_json::to_vec(order)?)?;
        Ok(())
    }

    pub fn list_order_history(&self, instance: &str, req: &PageRequest) -> Result<Vec<Order>, DbError> {
        Ok(scan_page::<Order>(&self.order_history, instance, req)?
            .into_iter()
            .map(|(_, o)| o)
            .collect())
    }

    /// CAS-style order update: loads, applies `f`, writes back inside a
    /// transaction keyed by the order's own tree to guarantee
    /// linearizable per-order transitions (§5).
    pub fn update_order<F>(&self, instance: &str, order_id: &str, f: F) -> Result<Order, DbError>
    where
        F: Fn(&mut Order) -> Result<(), DbError>,
    {
        let key = Self::order_key(instance, order_id);
        let result: Result<Order, sled::transaction::TransactionError<DbError>> = self.orders.transaction(|tree| {
            let current = tree.get(&key)?.ok_or_else(|| {
                sled::transaction::ConflictableTransactionError::Abort(DbError::NotFound)
            })?;
            let mut order: Order = serde_json::from_slice(&current)
                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(DbError::from(e)))?;
            f(&mut order).map_err(sled::transaction::ConflictableTransactionError::Abort)?;
            order.bump();
            let bytes = serde_json::to_vec(&order)
                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(DbError::from(e)))?;
            tree.insert(&key, bytes)?;
            Ok(order)
        });
        result.map_err(|e| match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(s) => DbError::from(s),
        })
    }

    // ---- Deposits -------------------------------------------------------

    fn deposit_key(instance: &str, order_id: &str, coin_pub: &str) -> Vec<u8> {
        format!("{instance}\0{order_id}\0{coin_pub}").into_bytes()
    }

    pub fn list_deposits(&self, instance: &str, order_id: &str) -> Result<Vec<Deposit>, DbError> {
        let prefix = format!("{instance}\0{order_id}\0");
        let mut out = Vec::new();
        for entry in self.deposits.scan_prefix(prefix.as_bytes()) {
            let (_, v) = entry?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    /// Commits all deposits for a paid order plus the order's PAID
    /// transition as one unit (4.G step 6): both trees participate in a
    /// single sled transaction so a crash mid-commit can't leave deposits
    /// without the order transition or vice-versa.
    pub fn commit_payment(&self, order: &Order, deposits: &[Deposit]) -> Result<(), DbError> {
        let order_key = Self::order_key(&order.instance_id, &order.order_id);
        let order_bytes = serde_json::to_vec(order)?;
        let mut deposit_entries = Vec::with_capacity(deposits.len());
        for d in deposits {
            let key = Self::deposit_key(&d.instance_id, &d.order_id, &d.coin_pub);
            deposit_entries.push((key, serde_json::to_vec(d)?));
        }

        let mut coin_index_entries = Vec::with_capacity(deposits.len());
        for d in deposits {
            let key = format!("{}\0{}", d.instance_id, d.coin_pub).into_bytes();
            coin_index_entries.push((key, d.order_id.clone().into_bytes()));
        }

        let result: Result<(), sled::transaction::TransactionError<DbError>> =
            (&self.orders, &self.deposits, &self.deposit_by_coin).transaction(|(orders_tx, deposits_tx, coin_index_tx)| {
                orders_tx.insert(&order_key, order_bytes.clone())?;
                for (k, v) in &deposit_entries {
                    deposits_tx.insert(k.as_slice(), v.clone())?;
                }
                for (k, v) in &coin_index_entries {
                    coin_index_tx.insert(k.as_slice(), v.clone())?;
                }
                Ok(())
            });
        result.map_err(DbError::from)?;
        let row = self.next_order_row()?;
        self.order_history.insert(pagination::row_key(&order.instance_id, row), serde_json::to_vec(order)?)?;
        self.notifier.wake(&order.instance_id, &order.order_id);
        Ok(())
    }

    // ---- Refunds --------------------------------------------------------

    pub fn list_refunds(&self, instance: &str, order_id: &str) -> Result<Vec<RefundRecord>, DbError> {
        let prefix = format!("{instance}\0{order_id}\0");
        let mut out = Vec::new();
        for entry in self.refunds.scan_prefix(prefix.as_bytes()) {
            let (_, v) = entry?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    pub fn insert_refund(&self, refund: &RefundRecord) -> Result<(), DbError> {
        let key = format!(
            "{}\0{}\0{}\0{}",
            refund.instance_id, refund.order_id, refund.coin_pub, refund.rtransaction_id
        );
        self.refunds.insert(key.as_bytes(), serde_json::to_vec(refund)?)?;
        self.notifier.wake(&refund.instance_id, &refund.order_id);
        Ok(())
    }

    // ---- Tip reserves / tips --------------------------------------------

    pub fn get_tip_reserve(&self, instance: &str, reserve_pub: &str) -> Result<TipReserve, DbError> {
        let key = format!("{instance}\0{reserve_pub}");
        let bytes = self.tip_reserves.get(key.as_bytes())?.ok_or(DbError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn put_tip_reserve(&self, reserve: &TipReserve) -> Result<(), DbError> {
        let key = format!("{}\0{}", reserve.instance_id, reserve.reserve_pub);
        self.tip_reserves.insert(key.as_bytes(), serde_json::to_vec(reserve)?)?;
        Ok(())
    }

    pub fn get_tip(&self, instance: &str, tip_id: &str) -> Result<Tip, DbError> {
        let key = format!("{instance}\0{tip_id}");
        let bytes = self.tips.get(key.as_bytes())?.ok_or(DbError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn put_tip(&self, tip: &Tip) -> Result<(), DbError> {
        let key = format!("{}\0{}", tip.instance_id, tip.tip_id);
        self.tips.insert(key.as_bytes(), serde_json::to_vec(tip)?)?;
        self.notifier.wake(&tip.instance_id, &tip.tip_id);
        Ok(())
    }

    // ---- Wire transfers ---------------------------------------------

    pub fn get_wire_transfer(&self, instance: &str, wtid: &str) -> Result<Option<WireTransferRecord>, DbError> {
        let key = format!("{instance}\0{wtid}");
        match self.wire_transfers.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_wire_transfer(&self, record: &WireTransferRecord) -> Result<(), DbError> {
        let key = format!("{}\0{}", record.instance_id, record.wtid);
        self.wire_transfers.insert(key.as_bytes(), serde_json::to_vec(record)?)?;
        for coin in &record.coins {
            let idx_key = format!("{}\0{}\0{}", record.instance_id, coin.order_id, record.wtid);
            self.wire_order_index.insert(idx_key.as_bytes(), b"1")?;
        }
        Ok(())
    }

    /// Resolves a coin's owning order within this instance, populated
    /// alongside the PAID transition in `commit_payment`. Used by
    /// track_transfer to confirm a reported coin actually belongs here
    /// before the wire-transfer record is trusted.
    pub fn order_for_coin(&self, instance: &str, coin_pub: &str) -> Result<Option<String>, DbError> {
        let key = format!("{instance}\0{coin_pub}");
        match self.deposit_by_coin.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    pub fn wtids_for_order(&self, instance: &str, order_id: &str) -> Result<Vec<String>, DbError> {
        let prefix = format!("{instance}\0{order_id}\0");
        let mut out = Vec::new();
        for entry in self.wire_order_index.scan_prefix(prefix.as_bytes()) {
            let (k, _) = entry?;
            let key_str = String::from_utf8_lossy(&k);
            if let Some(wtid) = key_str.rsplit('\0').next() {
                out.push(wtid.to_string());
            }
        }
        Ok(out)
    }

    // ---- Key-state snapshots (persisted mirror for restart recovery) ----

    pub fn put_key_snapshot(&self, snapshot: &ExchangeKeySnapshot) -> Result<(), DbError> {
        self.key_snapshots
            .insert(snapshot.exchange_url.as_bytes(), serde_json::to_vec(snapshot)?)?;
        Ok(())
    }

    pub fn get_key_snapshot(&self, exchange_url: &str) -> Result<Option<ExchangeKeySnapshot>, DbError> {
        match self.key_snapshots.get(exchange_url.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- Idempotency ------------------------------------------------------

    fn idempotency_key(instance: &str, fingerprint: &str) -> Vec<u8> {
        format!("{instance}\0{fingerprint}").into_bytes()
    }

    pub fn get_idempotent_reply(&self, instance: &str, fingerprint: &str) -> Result<Option<(u16, Vec<u8>)>, DbError> {
        let key = Self::idempotency_key(instance, fingerprint);
        match self.idempotency.get(key)? {
            Some(bytes) => {
                let stored: StoredReply = serde_json::from_slice(&bytes)?;
                Ok(Some((stored.status, stored.body)))
            }
            None => Ok(None),
        }
    }

    pub fn put_idempotent_reply(&self, instance: &str, fingerprint: &str, status: u16, body: Vec<u8>) -> Result<(), DbError> {
        let key = Self::idempotency_key(instance, fingerprint);
        let stored = StoredReply { status, body };
        self.idempotency.insert(key, serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), DbError> {
        self.db.flush()?;
        Ok(())
    }
}

pub fn shared(db: MerchantDb) -> Arc<MerchantDb> {
    Arc::new(db)
}
