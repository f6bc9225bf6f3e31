//! Domain model and pure-logic helpers shared by every component of the
//! merchant backend (§3 DATA MODEL). No I/O lives here: persistence,
//! HTTP, and RPC clients are separate crates that depend on this one.

pub mod amount;
pub mod deposit;
pub mod error;
pub mod instance;
pub mod keys;
pub mod order;
pub mod product;
pub mod refund;
pub mod tip;
pub mod wire;

pub use amount::{Amount, AmountError};
pub use deposit::{CoinDeposit, Deposit};
pub use error::MerchantError;
pub use instance::{BankAccount, Instance, InstanceDefaults};
pub use keys::{Auditor, DenominationKey, DenominationUse, ExchangeKeySnapshot, SigningKey};
pub use order::{ContractTerms, Order, OrderState, Proposal, ProposalError};
pub use product::{Product, ProductError, StockLock, INFINITE_STOCK};
pub use refund::RefundRecord;
pub use tip::{Tip, TipPickupError, TipReserve, TipReserveError};
pub use wire::{WireTransferCoin, WireTransferRecord};
