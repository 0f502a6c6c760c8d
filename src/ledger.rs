//! Ledger writer.
//!
//! Turns allocations into append-only ledger entries. A payment is split at
//! most once: the `payment_splits` row written alongside the entries is keyed
//! by payment id, so a second writer either sees it and replays, or trips the
//! primary key and fails with `StorageConflict`.

use crate::allocator::Allocation;
use crate::error::{EngineError, Result};
use crate::model::{EntryType, LedgerEntry, Payment, PaymentId};
use crate::money::{Currency, Money};
use chrono::{SubsecRound, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Outcome of [`write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    /// Entries were inserted by this call.
    Fresh(Vec<LedgerEntry>),
    /// The payment had already been split; these are the committed entries.
    Existing(Vec<LedgerEntry>),
}

impl Written {
    pub fn entries(&self) -> &[LedgerEntry] {
        match self {
            Written::Fresh(entries) | Written::Existing(entries) => entries,
        }
    }
}

/// Returns `true` once `payment` has a committed split.
pub fn is_split(conn: &Connection, payment: PaymentId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM payment_splits WHERE payment_id = ?1",
            params![payment],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// All entries of one payment, in insertion order.
pub fn entries_for_payment(conn: &Connection, payment: PaymentId) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, payment_id, user_id, entry_type, currency, amount_minor, created_at
         FROM ledger_entries WHERE payment_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![payment], |row| {
            let currency: Currency = row.get(4)?;
            Ok(LedgerEntry {
                id: row.get(0)?,
                payment_id: row.get(1)?,
                user_id: row.get(2)?,
                entry_type: row.get(3)?,
                amount: Money::from_minor(row.get(5)?, currency),
                created_at: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Persists `allocations` for `payment` inside `tx`.
///
/// If the payment already has a split, the stored entries are returned
/// untouched. Otherwise the allocations must be in the payment's currency and
/// sum to its amount, or nothing is written and `Configuration` is returned.
pub fn write(tx: &Transaction<'_>, payment: &Payment, allocations: &[Allocation]) -> Result<Written> {
    if is_split(tx, payment.id)? {
        debug!("Payment {} already split, returning stored entries", payment.id);
        return Ok(Written::Existing(entries_for_payment(tx, payment.id)?));
    }

    let mut total = Money::zero(payment.amount.currency());
    for allocation in allocations {
        total = total.checked_add(allocation.amount)?;
    }
    if total != payment.amount {
        return Err(EngineError::Configuration(format!(
            "allocations for payment {} total {}, payment is {}",
            payment.id, total, payment.amount
        )));
    }

    let now = Utc::now().trunc_subsecs(3);
    tx.execute(
        "INSERT INTO payment_splits (payment_id, split_at) VALUES (?1, ?2)",
        params![payment.id, now],
    )?;

    let mut insert = tx.prepare_cached(
        "INSERT INTO ledger_entries
             (payment_id, user_id, entry_type, currency, amount_minor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    let mut entries = Vec::with_capacity(allocations.len());
    for allocation in allocations {
        let user_id = allocation.beneficiary.user_id();
        let entry_type = allocation.beneficiary.entry_type();
        insert.execute(params![
            payment.id,
            user_id,
            entry_type,
            allocation.amount.currency(),
            allocation.amount.minor(),
            now
        ])?;

        entries.push(LedgerEntry {
            id: tx.last_insert_rowid(),
            payment_id: payment.id,
            user_id,
            entry_type,
            amount: allocation.amount,
            created_at: now,
        });
        debug!(
            "Payment {}: {} {} to {}",
            payment.id,
            allocation.amount,
            allocation.amount.currency(),
            allocation.beneficiary
        );
    }

    Ok(Written::Fresh(entries))
}

/// Company fund total in `currency`, summed from `COMPANY_FUND` entries.
pub fn company_fund_total(conn: &Connection, currency: Currency) -> Result<Money> {
    let minor: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_minor), 0) FROM ledger_entries
         WHERE entry_type = ?1 AND currency = ?2",
        params![EntryType::CompanyFund, currency],
        |row| row.get(0),
    )?;
    Ok(Money::from_minor(minor, currency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{Beneficiary, NewPayment, ProjectId, UserId};
    use crate::store;

    fn setup(minor: i64) -> (Connection, Payment) {
        let conn = store::open(&EngineConfig::default()).unwrap();
        let payment = store::create_payment(
            &conn,
            &NewPayment {
                project_id: ProjectId(1),
                amount: Money::from_minor(minor, Currency::Usd),
                note: String::new(),
                paid_at: Utc::now(),
            },
        )
        .unwrap();
        (conn, payment)
    }

    fn alloc(beneficiary: Beneficiary, minor: i64) -> Allocation {
        Allocation {
            beneficiary,
            amount: Money::from_minor(minor, Currency::Usd),
        }
    }

    #[test]
    fn test_write_inserts_typed_entries() {
        let (mut conn, payment) = setup(1000);
        let tx = conn.transaction().unwrap();
        let written = write(
            &tx,
            &payment,
            &[
                alloc(Beneficiary::CompanyFund, 600),
                alloc(Beneficiary::User(UserId(4)), 400),
            ],
        )
        .unwrap();
        tx.commit().unwrap();

        let entries = match written {
            Written::Fresh(entries) => entries,
            other => panic!("expected fresh write, got {:?}", other),
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::CompanyFund);
        assert_eq!(entries[0].user_id, None);
        assert_eq!(entries[1].entry_type, EntryType::ContractorShare);
        assert_eq!(entries[1].user_id, Some(UserId(4)));

        assert_eq!(entries_for_payment(&conn, payment.id).unwrap(), entries);
        assert!(is_split(&conn, payment.id).unwrap());
        assert_eq!(company_fund_total(&conn, Currency::Usd).unwrap().minor(), 600);
        assert_eq!(company_fund_total(&conn, Currency::Local).unwrap().minor(), 0);
    }

    #[test]
    fn test_second_write_returns_existing() {
        let (mut conn, payment) = setup(500);
        let allocations = [alloc(Beneficiary::CompanyFund, 500)];

        let tx = conn.transaction().unwrap();
        let first = write(&tx, &payment, &allocations).unwrap();
        tx.commit().unwrap();

        let tx = conn.transaction().unwrap();
        let second = write(&tx, &payment, &allocations).unwrap();
        tx.commit().unwrap();

        assert_eq!(second, Written::Existing(first.entries().to_vec()));
        assert_eq!(entries_for_payment(&conn, payment.id).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_allocations_not_matching_payment() {
        let (mut conn, payment) = setup(500);
        let tx = conn.transaction().unwrap();
        let err = write(&tx, &payment, &[alloc(Beneficiary::CompanyFund, 499)]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        drop(tx);

        assert!(!is_split(&conn, payment.id).unwrap());
    }

    #[test]
    fn test_rolled_back_write_leaves_nothing() {
        let (mut conn, payment) = setup(300);
        {
            let tx = conn.transaction().unwrap();
            write(&tx, &payment, &[alloc(Beneficiary::User(UserId(1)), 300)]).unwrap();
            // dropped without commit
        }
        assert!(!is_split(&conn, payment.id).unwrap());
        assert!(entries_for_payment(&conn, payment.id).unwrap().is_empty());
    }
}
