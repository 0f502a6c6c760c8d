//! Share resolution: who gets what percentage of a project's payments.
//!
//! Every project implicitly has a company-fund share equal to whatever the
//! members leave unclaimed. A project whose members claim more than 100% is
//! misconfigured and cannot be split.

use crate::error::{EngineError, Result};
use crate::model::{Beneficiary, ProjectId, UserId};
use log::debug;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// A percentage with two decimal places, stored as basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SharePercent(u32);

impl SharePercent {
    /// Basis points in 100%.
    pub const WHOLE_BPS: u32 = 10_000;

    pub const ZERO: Self = SharePercent(0);
    pub const HUNDRED: Self = SharePercent(Self::WHOLE_BPS);

    /// Builds a share from basis points (`3333` is 33.33%).
    pub fn from_bps(bps: u32) -> Result<Self> {
        if bps > Self::WHOLE_BPS {
            return Err(EngineError::Configuration(format!(
                "share of {} bps exceeds 100%",
                bps
            )));
        }
        Ok(SharePercent(bps))
    }

    /// Builds a share from a whole percentage.
    pub fn from_percent(percent: u32) -> Result<Self> {
        let bps = percent
            .checked_mul(100)
            .ok_or_else(|| EngineError::Configuration(format!("share {}% out of range", percent)))?;
        Self::from_bps(bps)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for SharePercent {
    type Err = EngineError;

    /// Parses `"33"`, `"33.5"` or `"33.33"`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let decimal = Decimal::from_str(trimmed)
            .map_err(|e| EngineError::Configuration(format!("share '{}': {}", trimmed, e)))?
            .normalize();

        if decimal.is_sign_negative() || decimal.scale() > 2 {
            return Err(EngineError::Configuration(format!(
                "share '{}' must be between 0 and 100 with at most 2 decimal places",
                trimmed
            )));
        }

        let mut scaled = decimal;
        scaled.rescale(2);
        let bps = u32::try_from(scaled.mantissa())
            .map_err(|_| EngineError::Configuration(format!("share '{}' out of range", trimmed)))?;
        Self::from_bps(bps)
    }
}

impl fmt::Display for SharePercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", Decimal::new(i64::from(self.0), 2).normalize())
    }
}

impl ToSql for SharePercent {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.0)))
    }
}

impl FromSql for SharePercent {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bps = u32::column_result(value)?;
        SharePercent::from_bps(bps).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// The validated share table for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShares {
    pub company: SharePercent,
    /// Members ordered by user id ascending.
    pub members: Vec<(UserId, SharePercent)>,
}

impl ResolvedShares {
    /// Derives the company share from member shares.
    ///
    /// Fails with `Configuration` when members are over-allocated or a user
    /// appears twice.
    pub fn from_members(mut members: Vec<(UserId, SharePercent)>) -> Result<Self> {
        members.sort_by_key(|(user, _)| *user);
        if let Some(pair) = members.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(EngineError::Configuration(format!(
                "user {} listed twice",
                pair[0].0
            )));
        }

        let claimed: u64 = members.iter().map(|(_, s)| u64::from(s.bps())).sum();
        if claimed > u64::from(SharePercent::WHOLE_BPS) {
            return Err(EngineError::Configuration(format!(
                "member shares total {} bps, over 100%",
                claimed
            )));
        }

        // claimed <= WHOLE_BPS was checked above
        let company = SharePercent(SharePercent::WHOLE_BPS - claimed as u32);
        Ok(ResolvedShares { company, members })
    }

    /// Beneficiaries in tie-break order. A zero company share is omitted; zero
    /// member shares are kept so every member appears in the ledger.
    pub fn beneficiaries(&self) -> Vec<(Beneficiary, SharePercent)> {
        let mut out = Vec::with_capacity(self.members.len() + 1);
        if !self.company.is_zero() {
            out.push((Beneficiary::CompanyFund, self.company));
        }
        out.extend(
            self.members
                .iter()
                .map(|(user, share)| (Beneficiary::User(*user), *share)),
        );
        out
    }
}

/// Loads the current membership of `project` and validates it.
///
/// Read-only. Always hits storage; shares are never cached between calls.
pub fn resolve(conn: &Connection, project: ProjectId) -> Result<ResolvedShares> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, share_bps FROM project_members
         WHERE project_id = ?1 ORDER BY user_id",
    )?;
    let members = stmt
        .query_map(params![project], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(UserId, SharePercent)>>>()?;

    let shares = ResolvedShares::from_members(members)?;
    debug!(
        "Project {}: company {}, {} member(s)",
        project,
        shares.company,
        shares.members.len()
    );
    Ok(shares)
}
