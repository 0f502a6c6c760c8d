//! Payment split engine.
//!
//! `process_payment_split` is the single entry point: load the payment,
//! resolve the project's shares, allocate, write ledger entries and credit
//! balances, all in one `BEGIN IMMEDIATE` transaction. Either the whole split
//! commits or none of it does.
//!
//! The engine also carries a small batch intake (members and payments from
//! CSV) and a balance report, used by the CLI.

use crate::allocator;
use crate::balance::{self, Reconciliation};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{self, Written};
use crate::model::{
    LedgerBalance, LedgerEntry, NewPayment, Payment, PaymentId, ProjectId, ProjectMember, UserId,
};
use crate::money::{Currency, Money};
use crate::records::{MemberRecord, PaymentRecord};
use crate::shares::{self, SharePercent};
use crate::store;
use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};

/// What a call to [`SplitEngine::process_payment_split`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub payment_id: PaymentId,
    /// Ledger entries of the payment, in beneficiary order.
    pub entries: Vec<LedgerEntry>,
    /// Balances credited by this call. Empty on replay.
    pub balances: Vec<LedgerBalance>,
    /// `true` if the payment had already been split and nothing was written.
    pub replayed: bool,
}

/// Counts from a batch CSV run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub accepted: usize,
    pub skipped: usize,
}

/// The split engine over one SQLite connection.
///
/// Calls are serialized on the connection. Several engines may open the same
/// database file; SQLite's write lock then serializes their splits.
pub struct SplitEngine {
    conn: Mutex<Connection>,
    config: EngineConfig,
}

impl SplitEngine {
    /// Opens the database named by `config`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let conn = store::open(&config)?;
        Ok(SplitEngine {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Opens a fresh in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::ConnectionPoisoned)
    }

    /// Splits a recorded payment across the company fund and project members.
    ///
    /// Idempotent: calling it again for the same payment returns the committed
    /// entries with `replayed == true` and credits nothing.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound` if no such payment exists
    /// - `Configuration` if the project's member shares exceed 100%
    /// - `InvalidAmount` if the stored amount is not positive
    /// - `StorageConflict` on lock contention; retrying is safe
    /// - `Storage` on other storage failures; nothing is applied
    pub fn process_payment_split(&self, payment_id: PaymentId) -> Result<SplitReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let payment = store::load_payment(&tx, payment_id)?
            .ok_or(EngineError::PaymentNotFound(payment_id))?;

        if ledger::is_split(&tx, payment_id)? {
            let entries = ledger::entries_for_payment(&tx, payment_id)?;
            debug!(
                "Payment {} already split into {} entries, nothing to do",
                payment_id,
                entries.len()
            );
            return Ok(SplitReport {
                payment_id,
                entries,
                balances: Vec::new(),
                replayed: true,
            });
        }

        let shares = shares::resolve(&tx, payment.project_id)?;
        let allocations = allocator::allocate(payment.amount, &shares.beneficiaries())?;

        let entries = match ledger::write(&tx, &payment, &allocations)? {
            Written::Fresh(entries) => entries,
            Written::Existing(entries) => {
                return Ok(SplitReport {
                    payment_id,
                    entries,
                    balances: Vec::new(),
                    replayed: true,
                })
            }
        };
        let balances = balance::apply_entries(&tx, &entries)?;
        tx.commit()?;

        info!(
            "Split payment {} of {} {} for project {} into {} entries",
            payment_id,
            payment.amount,
            payment.amount.currency(),
            payment.project_id,
            entries.len()
        );

        Ok(SplitReport {
            payment_id,
            entries,
            balances,
            replayed: false,
        })
    }

    /// Records a payment without splitting it.
    pub fn create_payment(&self, new: &NewPayment) -> Result<Payment> {
        let conn = self.conn()?;
        store::create_payment(&conn, new)
    }

    /// Records a payment and splits it straight away.
    ///
    /// If the split is rejected the payment stays recorded and shows up in
    /// [`unsplit_payments`](Self::unsplit_payments); the error is returned.
    pub fn intake_payment(&self, new: &NewPayment) -> Result<SplitReport> {
        let payment = self.create_payment(new)?;
        self.process_payment_split(payment.id).map_err(|e| {
            warn!("Payment {} recorded but not split: {}", payment.id, e);
            e
        })
    }

    pub fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let conn = self.conn()?;
        store::load_payment(&conn, id)
    }

    /// Payments recorded but never split.
    pub fn unsplit_payments(&self) -> Result<Vec<Payment>> {
        let conn = self.conn()?;
        store::unsplit_payments(&conn)
    }

    pub fn set_member_share(&self, project: ProjectId, user: UserId, share: SharePercent) -> Result<()> {
        let conn = self.conn()?;
        store::set_member_share(&conn, project, user, share)
    }

    pub fn remove_member(&self, project: ProjectId, user: UserId) -> Result<bool> {
        let conn = self.conn()?;
        store::remove_member(&conn, project, user)
    }

    /// Current members of `project`, ordered by user id.
    pub fn members(&self, project: ProjectId) -> Result<Vec<ProjectMember>> {
        let conn = self.conn()?;
        store::members(&conn, project)
    }

    pub fn entries_for_payment(&self, payment: PaymentId) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        ledger::entries_for_payment(&conn, payment)
    }

    pub fn company_fund_total(&self, currency: Currency) -> Result<Money> {
        let conn = self.conn()?;
        ledger::company_fund_total(&conn, currency)
    }

    /// Balance of `user` in `currency`.
    ///
    /// With `verify_on_read` set, the stored balance is first reconciled
    /// against the user's entries.
    pub fn balance_of(&self, user: UserId, currency: Currency) -> Result<Money> {
        let mut conn = self.conn()?;
        if !self.config.verify_on_read {
            return balance::balance_of(&conn, user, currency);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let report = balance::reconcile_user(&tx, user, currency)?;
        tx.commit()?;
        Ok(report.recomputed)
    }

    pub fn balances(&self) -> Result<Vec<LedgerBalance>> {
        let conn = self.conn()?;
        balance::balances(&conn)
    }

    /// Recomputes one balance from its entries, repairing it if needed.
    pub fn reconcile_user(&self, user: UserId, currency: Currency) -> Result<Reconciliation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let report = balance::reconcile_user(&tx, user, currency)?;
        tx.commit()?;
        Ok(report)
    }

    /// Recomputes every balance from the entry history.
    pub fn reconcile_all(&self) -> Result<Vec<Reconciliation>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let reports = balance::reconcile_all(&tx)?;
        tx.commit()?;

        let repaired = reports.iter().filter(|r| r.repaired).count();
        if repaired > 0 {
            warn!("Reconciliation repaired {} of {} balances", repaired, reports.len());
        } else {
            debug!("Reconciliation checked {} balances, all consistent", reports.len());
        }
        Ok(reports)
    }

    /// Loads project membership rows from CSV (`project,user,share`).
    ///
    /// Invalid rows are logged at warn level and skipped.
    pub fn load_members_csv<R: Read>(&self, reader: R) -> Result<BatchSummary> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut summary = BatchSummary::default();
        for (row_idx, result) in csv_reader.deserialize::<MemberRecord>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            let outcome = result
                .map_err(EngineError::from)
                .and_then(|record| record.parse())
                .and_then(|member| {
                    self.set_member_share(member.project_id, member.user_id, member.share)
                });

            match outcome {
                Ok(()) => summary.accepted += 1,
                Err(e) => {
                    warn!("Members row {}: {}", row_num, e);
                    summary.skipped += 1;
                }
            }
        }

        debug!(
            "Loaded {} member rows, skipped {}",
            summary.accepted, summary.skipped
        );
        Ok(summary)
    }

    /// Takes in and splits payments from CSV (`project,currency,amount,note`).
    ///
    /// Rows that fail to parse or to split are logged at warn level and
    /// skipped; a rejected split leaves its payment recorded but unsplit.
    pub fn process_payments_csv<R: Read>(&self, reader: R) -> Result<BatchSummary> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut summary = BatchSummary::default();
        for (row_idx, result) in csv_reader.deserialize::<PaymentRecord>().enumerate() {
            let row_num = row_idx + 2;

            let outcome = result
                .map_err(EngineError::from)
                .and_then(|record| record.parse())
                .and_then(|new| self.intake_payment(&new));

            match outcome {
                Ok(report) => {
                    debug!("Payments row {}: split payment {}", row_num, report.payment_id);
                    summary.accepted += 1;
                }
                Err(e) => {
                    warn!("Payments row {}: {}", row_num, e);
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Writes the company fund totals and user balances as CSV.
    ///
    /// Company rows come first, one per currency with any company entries,
    /// then users by id and currency. Amounts have exactly 2 decimal places.
    pub fn write_balances<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["beneficiary", "currency", "balance"])?;

        for currency in Currency::ALL {
            let total = self.company_fund_total(currency)?;
            if total.is_zero() {
                continue;
            }
            csv_writer.write_record([
                "company".to_string(),
                currency.to_string(),
                total.to_string(),
            ])?;
        }

        for row in self.balances()? {
            csv_writer.write_record([
                row.user_id.to_string(),
                row.balance.currency().to_string(),
                row.balance.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}
