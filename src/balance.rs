//! Per-user running balances.
//!
//! Maintains the invariant: a user's balance in a currency equals the sum of
//! that user's ledger entries in that currency.
//!
//! Balances are only ever changed by a single SQL upsert that adds to the
//! stored value, so concurrent splits crediting the same user cannot lose an
//! update. The company fund has no balance row; see
//! [`ledger::company_fund_total`](crate::ledger::company_fund_total).

use crate::error::{EngineError, Result};
use crate::model::{Beneficiary, LedgerBalance, LedgerEntry, UserId};
use crate::money::{Currency, Money};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::collections::BTreeSet;

/// Credits every user entry in `entries` to its owner's balance, creating the
/// balance row at zero first when absent. Company-fund entries are skipped.
///
/// Returns the resulting balances of the touched `(user, currency)` pairs,
/// ordered by user then currency. A credit that would overflow the stored
/// balance fails with `InvalidAmount` and nothing is credited.
pub fn apply_entries(tx: &Transaction<'_>, entries: &[LedgerEntry]) -> Result<Vec<LedgerBalance>> {
    let mut touched = BTreeSet::new();
    {
        let mut credit = tx.prepare_cached(
            "INSERT INTO ledger_balances (user_id, currency, balance_minor) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, currency)
             DO UPDATE SET balance_minor = balance_minor + excluded.balance_minor",
        )?;

        for entry in entries {
            let user = match entry.beneficiary() {
                Beneficiary::User(user) => user,
                Beneficiary::CompanyFund => continue,
            };
            let currency = entry.amount.currency();

            // SQLite would silently turn an overflowing sum into a REAL.
            balance_of(tx, user, currency)?
                .checked_add(entry.amount)
                .map_err(|_| {
                    EngineError::InvalidAmount(format!(
                        "crediting {} {} would overflow the balance of user {}",
                        entry.amount, currency, user
                    ))
                })?;

            credit.execute(params![user, currency, entry.amount.minor()])?;
            touched.insert((user, currency));
            debug!(
                "Credited {} {} to user {}",
                entry.amount,
                entry.amount.currency(),
                user
            );
        }
    }

    let mut updated = Vec::with_capacity(touched.len());
    for (user, currency) in touched {
        updated.push(LedgerBalance {
            user_id: user,
            balance: balance_of(tx, user, currency)?,
        });
    }
    Ok(updated)
}

fn stored_balance(conn: &Connection, user: UserId, currency: Currency) -> Result<Option<Money>> {
    let minor: Option<i64> = conn
        .query_row(
            "SELECT balance_minor FROM ledger_balances WHERE user_id = ?1 AND currency = ?2",
            params![user, currency],
            |row| row.get(0),
        )
        .optional()?;
    Ok(minor.map(|m| Money::from_minor(m, currency)))
}

/// The stored balance of `user` in `currency`, zero if the user has none.
pub fn balance_of(conn: &Connection, user: UserId, currency: Currency) -> Result<Money> {
    Ok(stored_balance(conn, user, currency)?.unwrap_or(Money::zero(currency)))
}

/// Every stored balance, ordered by user then currency.
pub fn balances(conn: &Connection) -> Result<Vec<LedgerBalance>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, currency, balance_minor FROM ledger_balances
         ORDER BY user_id, currency",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let currency: Currency = row.get(1)?;
            Ok(LedgerBalance {
                user_id: row.get(0)?,
                balance: Money::from_minor(row.get(2)?, currency),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Sum of the user's ledger entries in `currency`.
pub fn recompute(conn: &Connection, user: UserId, currency: Currency) -> Result<Money> {
    let minor: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_minor), 0) FROM ledger_entries
         WHERE user_id = ?1 AND currency = ?2",
        params![user, currency],
        |row| row.get(0),
    )?;
    Ok(Money::from_minor(minor, currency))
}

/// Result of checking one stored balance against the entry history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub user_id: UserId,
    pub currency: Currency,
    /// Stored balance before the check (zero if no row existed).
    pub stored: Money,
    /// Balance recomputed from ledger entries.
    pub recomputed: Money,
    /// `true` if the stored balance was overwritten.
    pub repaired: bool,
}

impl Reconciliation {
    pub fn was_consistent(&self) -> bool {
        !self.repaired
    }
}

/// Recomputes `user`'s balance from their entries and overwrites the stored
/// value if it disagrees.
pub fn reconcile_user(tx: &Transaction<'_>, user: UserId, currency: Currency) -> Result<Reconciliation> {
    let stored = stored_balance(tx, user, currency)?;
    let recomputed = recompute(tx, user, currency)?;

    // A missing row is only a discrepancy if the user has entries.
    let repaired = match stored {
        Some(balance) => balance != recomputed,
        None => !recomputed.is_zero(),
    };

    if repaired {
        warn!(
            "Balance of user {} in {} was {}, entries sum to {}; repairing",
            user,
            currency,
            stored.map(|m| m.to_string()).unwrap_or_else(|| "missing".to_string()),
            recomputed
        );
        tx.execute(
            "INSERT INTO ledger_balances (user_id, currency, balance_minor) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, currency) DO UPDATE SET balance_minor = excluded.balance_minor",
            params![user, currency, recomputed.minor()],
        )?;
    }

    Ok(Reconciliation {
        user_id: user,
        currency,
        stored: stored.unwrap_or(Money::zero(currency)),
        recomputed,
        repaired,
    })
}

/// Reconciles every `(user, currency)` pair present in either the entries or
/// the stored balances.
pub fn reconcile_all(tx: &Transaction<'_>) -> Result<Vec<Reconciliation>> {
    let pairs: Vec<(UserId, Currency)> = {
        let mut stmt = tx.prepare(
            "SELECT user_id, currency FROM ledger_entries WHERE user_id IS NOT NULL
             UNION
             SELECT user_id, currency FROM ledger_balances
             ORDER BY 1, 2",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(UserId, Currency)>>>()?;
        rows
    };

    pairs
        .into_iter()
        .map(|(user, currency)| reconcile_user(tx, user, currency))
        .collect()
}
