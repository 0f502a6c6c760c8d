//! CSV records for batch intake of project members and payments.

use crate::error::{EngineError, Result};
use crate::model::{NewPayment, ProjectId, ProjectMember, UserId};
use crate::money::{Currency, Money};
use crate::shares::SharePercent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;

/// Raw membership row: `project,user,share`.
#[derive(Debug, Deserialize)]
pub struct MemberRecord {
    pub project: i64,
    pub user: i64,
    /// Percentage of the project's payments, e.g. `"33.5"`.
    pub share: String,
}

impl MemberRecord {
    pub fn parse(&self) -> Result<ProjectMember> {
        Ok(ProjectMember {
            project_id: ProjectId(self.project),
            user_id: UserId(self.user),
            share: SharePercent::from_str(&self.share)?,
        })
    }
}

/// Raw payment row: `project,currency,amount,note[,paid_at]`.
///
/// `paid_at` is optional RFC 3339; when absent the payment is stamped with the
/// time it is read.
#[derive(Debug, Deserialize)]
pub struct PaymentRecord {
    pub project: i64,
    pub currency: String,
    pub amount: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
}

impl PaymentRecord {
    /// Parses the raw CSV record into a payment ready for intake.
    pub fn parse(&self) -> Result<NewPayment> {
        let currency = Currency::from_str(&self.currency)?;
        let amount = Money::parse(&self.amount, currency)?;

        let paid_at = match self.paid_at.as_deref().map(str::trim) {
            None | Some("") => Utc::now(),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| EngineError::InvalidRecord(format!("paid_at '{}': {}", raw, e)))?
                .with_timezone(&Utc),
        };

        Ok(NewPayment {
            project_id: ProjectId(self.project),
            amount,
            note: self.note.as_deref().map(str::trim).unwrap_or_default().to_string(),
            paid_at,
        })
    }
}
