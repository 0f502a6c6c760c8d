//! # Split Ledger
//!
//! Splits client payments on a project between the company fund and the
//! project's contractors, records every allocation as an immutable ledger
//! entry, and keeps per-user balances in step with those entries.
//!
//! ## Design Principles
//!
//! - **Integer money**: amounts are minor units (`i64`); shares are basis points
//! - **Exact sums**: allocations of a payment always add up to the payment
//! - **Exactly once**: a payment is split at most once, however often it is submitted
//! - **Reconcilable balances**: a balance always equals the sum of its entries,
//!   and can be recomputed and repaired from them
//!
//! ## Example
//!
//! ```no_run
//! use split_ledger::{Currency, Money, NewPayment, ProjectId, SharePercent, SplitEngine, UserId};
//!
//! let engine = SplitEngine::open_in_memory().unwrap();
//! engine
//!     .set_member_share(ProjectId(1), UserId(7), SharePercent::from_percent(40).unwrap())
//!     .unwrap();
//!
//! let report = engine
//!     .intake_payment(&NewPayment {
//!         project_id: ProjectId(1),
//!         amount: Money::parse("1000.00", Currency::Usd).unwrap(),
//!         note: "milestone 1".to_string(),
//!         paid_at: chrono::Utc::now(),
//!     })
//!     .unwrap();
//! assert_eq!(report.entries.len(), 2);
//! ```

pub mod allocator;
pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod model;
pub mod money;
pub mod records;
pub mod shares;
pub mod store;

pub use allocator::{allocate, Allocation};
pub use balance::Reconciliation;
pub use config::EngineConfig;
pub use engine::{BatchSummary, SplitEngine, SplitReport};
pub use error::{EngineError, Result};
pub use ledger::Written;
pub use model::{
    Beneficiary, EntryType, LedgerBalance, LedgerEntry, NewPayment, Payment, PaymentId, ProjectId,
    ProjectMember, UserId,
};
pub use money::{Currency, Money};
pub use records::{MemberRecord, PaymentRecord};
pub use shares::{ResolvedShares, SharePercent};
