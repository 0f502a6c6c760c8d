//! SQLite storage: schema, connection setup, payment intake and project
//! membership maintenance.
//!
//! Intake and membership are the engine's collaborators rather than part of
//! the split itself; they live here so the engine can be driven end to end.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{NewPayment, Payment, PaymentId, ProjectId, ProjectMember, UserId};
use crate::money::{Currency, Money};
use crate::shares::SharePercent;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS payments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id   INTEGER NOT NULL,
    currency     TEXT    NOT NULL CHECK (currency IN ('LOCAL', 'USD')),
    amount_minor INTEGER NOT NULL CHECK (amount_minor > 0),
    note         TEXT    NOT NULL DEFAULT '',
    paid_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS project_members (
    project_id INTEGER NOT NULL,
    user_id    INTEGER NOT NULL,
    share_bps  INTEGER NOT NULL CHECK (share_bps BETWEEN 0 AND 10000),
    PRIMARY KEY (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS payment_splits (
    payment_id INTEGER PRIMARY KEY REFERENCES payments(id),
    split_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    payment_id   INTEGER NOT NULL REFERENCES payment_splits(payment_id),
    user_id      INTEGER,
    entry_type   TEXT    NOT NULL CHECK (entry_type IN ('COMPANY_FUND', 'CONTRACTOR_SHARE')),
    currency     TEXT    NOT NULL,
    amount_minor INTEGER NOT NULL CHECK (amount_minor >= 0),
    created_at   TEXT    NOT NULL,
    CHECK ((entry_type = 'COMPANY_FUND') = (user_id IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS ledger_entries_beneficiary
    ON ledger_entries (payment_id, COALESCE(user_id, -1));

CREATE INDEX IF NOT EXISTS ledger_entries_user
    ON ledger_entries (user_id, currency);

CREATE TABLE IF NOT EXISTS ledger_balances (
    user_id       INTEGER NOT NULL,
    currency      TEXT    NOT NULL,
    balance_minor INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, currency)
);
";

/// Opens the database named by `config` (in-memory when unset) and makes
/// sure the schema exists.
pub fn open(config: &EngineConfig) -> Result<Connection> {
    let conn = match &config.db_path {
        Some(path) => {
            debug!("Opening ledger database {}", path.display());
            Connection::open(path)?
        }
        None => {
            debug!("Opening in-memory ledger database");
            Connection::open_in_memory()?
        }
    };

    conn.busy_timeout(config.busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let currency: Currency = row.get("currency")?;
    Ok(Payment {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        amount: Money::from_minor(row.get("amount_minor")?, currency),
        note: row.get("note")?,
        paid_at: row.get("paid_at")?,
    })
}

/// Records a new payment. Rejects non-positive amounts.
pub fn create_payment(conn: &Connection, new: &NewPayment) -> Result<Payment> {
    if !new.amount.is_positive() {
        return Err(EngineError::InvalidAmount(format!(
            "payment amount must be positive, got {}",
            new.amount
        )));
    }

    conn.execute(
        "INSERT INTO payments (project_id, currency, amount_minor, note, paid_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            new.project_id,
            new.amount.currency(),
            new.amount.minor(),
            new.note,
            new.paid_at
        ],
    )?;

    let payment = Payment {
        id: PaymentId(conn.last_insert_rowid()),
        project_id: new.project_id,
        amount: new.amount,
        note: new.note.clone(),
        paid_at: new.paid_at,
    };
    debug!(
        "Recorded payment {} of {} {} for project {}",
        payment.id,
        payment.amount,
        payment.amount.currency(),
        payment.project_id
    );
    Ok(payment)
}

pub fn load_payment(conn: &Connection, id: PaymentId) -> Result<Option<Payment>> {
    let payment = conn
        .query_row(
            "SELECT id, project_id, currency, amount_minor, note, paid_at
             FROM payments WHERE id = ?1",
            params![id],
            payment_from_row,
        )
        .optional()?;
    Ok(payment)
}

/// Payments that have no ledger entries yet, oldest first. A payment lands
/// here when its split was rejected and it needs attention.
pub fn unsplit_payments(conn: &Connection) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.project_id, p.currency, p.amount_minor, p.note, p.paid_at
         FROM payments p
         LEFT JOIN payment_splits s ON s.payment_id = p.id
         WHERE s.payment_id IS NULL
         ORDER BY p.id",
    )?;
    let payments = stmt
        .query_map([], payment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments)
}

/// Adds `user` to `project` or changes their share.
///
/// The project total is not checked here; over-allocation is caught when a
/// payment is split.
pub fn set_member_share(
    conn: &Connection,
    project: ProjectId,
    user: UserId,
    share: SharePercent,
) -> Result<()> {
    conn.execute(
        "INSERT INTO project_members (project_id, user_id, share_bps) VALUES (?1, ?2, ?3)
         ON CONFLICT (project_id, user_id) DO UPDATE SET share_bps = excluded.share_bps",
        params![project, user, share],
    )?;
    debug!("Project {}: user {} share set to {}", project, user, share);
    Ok(())
}

/// Removes `user` from `project`. Returns `false` if they were not a member.
pub fn remove_member(conn: &Connection, project: ProjectId, user: UserId) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
        params![project, user],
    )?;
    Ok(removed > 0)
}

pub fn members(conn: &Connection, project: ProjectId) -> Result<Vec<ProjectMember>> {
    let mut stmt = conn.prepare(
        "SELECT project_id, user_id, share_bps FROM project_members
         WHERE project_id = ?1 ORDER BY user_id",
    )?;
    let members = stmt
        .query_map(params![project], |row| {
            Ok(ProjectMember {
                project_id: row.get(0)?,
                user_id: row.get(1)?,
                share: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn memory() -> Connection {
        open(&EngineConfig::default()).unwrap()
    }

    fn new_payment(project: i64, minor: i64) -> NewPayment {
        NewPayment {
            project_id: ProjectId(project),
            amount: Money::from_minor(minor, Currency::Local),
            note: "advance".to_string(),
            paid_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_create_and_load_payment() {
        let conn = memory();
        let created = create_payment(&conn, &new_payment(1, 125_000)).unwrap();

        let loaded = load_payment(&conn, created.id).unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.amount.currency(), Currency::Local);
    }

    #[test]
    fn test_load_missing_payment() {
        let conn = memory();
        assert!(load_payment(&conn, PaymentId(42)).unwrap().is_none());
    }

    #[test]
    fn test_create_rejects_non_positive() {
        let conn = memory();
        let err = create_payment(&conn, &new_payment(1, 0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount(_)));
        assert!(unsplit_payments(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_member_share_upsert_and_remove() {
        let conn = memory();
        let project = ProjectId(3);
        set_member_share(&conn, project, UserId(2), SharePercent::from_str("20").unwrap()).unwrap();
        set_member_share(&conn, project, UserId(1), SharePercent::from_str("10").unwrap()).unwrap();
        set_member_share(&conn, project, UserId(2), SharePercent::from_str("25").unwrap()).unwrap();

        let listed = members(&conn, project).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].user_id, UserId(1));
        assert_eq!(listed[1].share.bps(), 2500);

        assert!(remove_member(&conn, project, UserId(1)).unwrap());
        assert!(!remove_member(&conn, project, UserId(1)).unwrap());
        assert_eq!(members(&conn, project).unwrap().len(), 1);
    }

    #[test]
    fn test_new_payments_are_unsplit() {
        let conn = memory();
        create_payment(&conn, &new_payment(1, 100)).unwrap();
        create_payment(&conn, &new_payment(2, 200)).unwrap();
        assert_eq!(unsplit_payments(&conn).unwrap().len(), 2);
    }
}
