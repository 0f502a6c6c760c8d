//! Persistent records the engine reads and writes.

use crate::money::Money;
use crate::shares::SharePercent;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

row_id!(
    /// Identifies a client payment.
    PaymentId
);
row_id!(
    /// Identifies a project.
    ProjectId
);
row_id!(
    /// Identifies a contractor (user).
    UserId
);

/// A client payment received against a project. Immutable once split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub project_id: ProjectId,
    /// Amount and currency of the payment.
    pub amount: Money,
    pub note: String,
    pub paid_at: DateTime<Utc>,
}

/// A payment as submitted by intake, before it has an id.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub project_id: ProjectId,
    pub amount: Money,
    pub note: String,
    pub paid_at: DateTime<Utc>,
}

/// A contractor's configured share of a project's payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMember {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub share: SharePercent,
}

/// Recipient of part of a payment.
///
/// The derived ordering puts the company fund first, then users by id. The
/// allocator uses it to break remainder ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Beneficiary {
    CompanyFund,
    User(UserId),
}

impl Beneficiary {
    /// The user id, or `None` for the company fund.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Beneficiary::CompanyFund => None,
            Beneficiary::User(id) => Some(*id),
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self {
            Beneficiary::CompanyFund => EntryType::CompanyFund,
            Beneficiary::User(_) => EntryType::ContractorShare,
        }
    }
}

impl fmt::Display for Beneficiary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Beneficiary::CompanyFund => f.write_str("company"),
            Beneficiary::User(id) => write!(f, "{}", id),
        }
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    CompanyFund,
    ContractorShare,
}

impl EntryType {
    pub fn code(&self) -> &'static str {
        match self {
            EntryType::CompanyFund => "COMPANY_FUND",
            EntryType::ContractorShare => "CONTRACTOR_SHARE",
        }
    }
}

impl ToSql for EntryType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for EntryType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "COMPANY_FUND" => Ok(EntryType::CompanyFund),
            "CONTRACTOR_SHARE" => Ok(EntryType::ContractorShare),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// One beneficiary's allocation from one payment. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub payment_id: PaymentId,
    /// `None` for the company fund.
    pub user_id: Option<UserId>,
    pub entry_type: EntryType,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn beneficiary(&self) -> Beneficiary {
        match self.user_id {
            Some(id) => Beneficiary::User(id),
            None => Beneficiary::CompanyFund,
        }
    }
}

/// Running balance of one user in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerBalance {
    pub user_id: UserId,
    pub balance: Money,
}
