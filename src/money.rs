//! Currency-typed fixed-point money.
//!
//! Amounts are held as integer minor units (paisa, cents). `rust_decimal` is
//! only used at the text boundary, to parse and format decimal strings, so no
//! binary floating point ever touches allocation math.

use crate::error::{EngineError, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The currencies a payment can be made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Local currency, minor unit is the paisa.
    Local,
    Usd,
}

impl Currency {
    /// Number of decimal places in one major unit. Both currencies use 2.
    pub const SCALE: u32 = 2;

    /// All supported currencies, in reporting order.
    pub const ALL: [Currency; 2] = [Currency::Local, Currency::Usd];

    /// Returns the storage / wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Local => "LOCAL",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOCAL" => Ok(Currency::Local),
            "USD" => Ok(Currency::Usd),
            other => Err(EngineError::InvalidAmount(format!(
                "unknown currency '{}'",
                other
            ))),
        }
    }
}

impl ToSql for Currency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Currency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Currency::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// An amount of money in a single currency, counted in minor units.
///
/// # Examples
///
/// ```
/// use split_ledger::{Currency, Money};
///
/// let amount = Money::parse("10.5", Currency::Usd).unwrap();
/// assert_eq!(amount.minor(), 1050);
/// assert_eq!(amount.to_string(), "10.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    /// Creates an amount from a count of minor units.
    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Money { minor, currency }
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Money { minor: 0, currency }
    }

    /// Parses a decimal string such as `"1250.50"`.
    ///
    /// Inputs with more fractional digits than the currency carries are
    /// rejected instead of rounded.
    pub fn parse(s: &str, currency: Currency) -> Result<Self> {
        let trimmed = s.trim();
        let decimal = Decimal::from_str(trimmed)
            .map_err(|e| EngineError::InvalidAmount(format!("'{}': {}", trimmed, e)))?
            .normalize();

        if decimal.scale() > Currency::SCALE {
            return Err(EngineError::InvalidAmount(format!(
                "'{}' has more than {} decimal places",
                trimmed,
                Currency::SCALE
            )));
        }

        let mut scaled = decimal;
        scaled.rescale(Currency::SCALE);
        let minor = i64::try_from(scaled.mantissa())
            .map_err(|_| EngineError::InvalidAmount(format!("'{}' is out of range", trimmed)))?;

        Ok(Money { minor, currency })
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// Adds two amounts of the same currency.
    pub fn checked_add(self, rhs: Money) -> Result<Money> {
        if self.currency != rhs.currency {
            return Err(EngineError::Configuration(format!(
                "cannot add {} to {}",
                rhs.currency, self.currency
            )));
        }
        let minor = self
            .minor
            .checked_add(rhs.minor)
            .ok_or_else(|| EngineError::InvalidAmount("amount overflow".to_string()))?;
        Ok(Money::from_minor(minor, self.currency))
    }

    /// The amount as a decimal in major units.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor, Currency::SCALE)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.to_decimal())
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{} {}", self, self.currency))
    }
}
