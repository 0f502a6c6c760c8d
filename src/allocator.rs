//! Split allocation.
//!
//! Each beneficiary first receives `floor(amount * bps / 10_000)` minor units.
//! The few units lost to truncation are handed out one at a time, largest
//! fractional part first, ties going to the earlier beneficiary (company fund,
//! then users by id). The allocations always sum to the payment amount.

use crate::error::{EngineError, Result};
use crate::model::Beneficiary;
use crate::money::Money;
use crate::shares::SharePercent;
use serde::Serialize;
use std::cmp::Reverse;

/// One beneficiary's portion of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    #[serde(serialize_with = "serialize_beneficiary")]
    pub beneficiary: Beneficiary,
    pub amount: Money,
}

fn serialize_beneficiary<S>(b: &Beneficiary, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.collect_str(b)
}

/// Splits `amount` across `shares`.
///
/// Returns one allocation per beneficiary, in beneficiary order, including
/// zero-amount allocations for shares too small to earn a minor unit.
///
/// # Errors
///
/// - `InvalidAmount` if `amount` is not positive
/// - `Configuration` if `shares` is empty, names a beneficiary twice, or does
///   not total exactly 100%
pub fn allocate(amount: Money, shares: &[(Beneficiary, SharePercent)]) -> Result<Vec<Allocation>> {
    if !amount.is_positive() {
        return Err(EngineError::InvalidAmount(format!(
            "payment amount must be positive, got {}",
            amount
        )));
    }
    if shares.is_empty() {
        return Err(EngineError::Configuration("no beneficiaries".to_string()));
    }

    let mut ordered = shares.to_vec();
    ordered.sort_by_key(|(beneficiary, _)| *beneficiary);
    if let Some(pair) = ordered.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(EngineError::Configuration(format!(
            "beneficiary {} listed twice",
            pair[0].0
        )));
    }

    let total_bps: u64 = ordered.iter().map(|(_, s)| u64::from(s.bps())).sum();
    if total_bps != u64::from(SharePercent::WHOLE_BPS) {
        return Err(EngineError::Configuration(format!(
            "shares total {} bps, expected {}",
            total_bps,
            SharePercent::WHOLE_BPS
        )));
    }

    let whole = i128::from(SharePercent::WHOLE_BPS);
    let mut floored: Vec<i64> = Vec::with_capacity(ordered.len());
    let mut fractions: Vec<i128> = Vec::with_capacity(ordered.len());
    for (_, share) in &ordered {
        let product = i128::from(amount.minor()) * i128::from(share.bps());
        // product / whole <= amount, so it fits back into i64
        floored.push((product / whole) as i64);
        fractions.push(product % whole);
    }

    let remainder = amount.minor() - floored.iter().sum::<i64>();
    debug_assert!(remainder >= 0 && (remainder as usize) < ordered.len());

    // Stable sort keeps beneficiary order among equal fractions.
    let mut by_fraction: Vec<usize> = (0..ordered.len()).collect();
    by_fraction.sort_by_key(|&i| Reverse(fractions[i]));
    for &i in by_fraction.iter().take(remainder as usize) {
        floored[i] += 1;
    }

    Ok(ordered
        .iter()
        .zip(floored)
        .map(|((beneficiary, _), minor)| Allocation {
            beneficiary: *beneficiary,
            amount: Money::from_minor(minor, amount.currency()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;
    use crate::money::Currency;
    use std::str::FromStr;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Usd)
    }

    fn pct(s: &str) -> SharePercent {
        SharePercent::from_str(s).unwrap()
    }

    fn user(id: i64) -> Beneficiary {
        Beneficiary::User(UserId(id))
    }

    fn minors(allocations: &[Allocation]) -> Vec<i64> {
        allocations.iter().map(|a| a.amount.minor()).collect()
    }

    #[test]
    fn test_even_split_has_no_remainder() {
        let allocations = allocate(
            usd(100),
            &[(user(1), pct("33")), (user(2), pct("33")), (user(3), pct("34"))],
        )
        .unwrap();
        assert_eq!(minors(&allocations), vec![33, 33, 34]);
    }

    #[test]
    fn test_remainder_goes_to_largest_fraction() {
        let allocations = allocate(
            usd(100),
            &[
                (user(1), pct("33.33")),
                (user(2), pct("33.33")),
                (user(3), pct("33.34")),
            ],
        )
        .unwrap();
        assert_eq!(minors(&allocations), vec![33, 33, 34]);
    }

    #[test]
    fn test_ties_favor_company_fund_then_lower_user_id() {
        let allocations = allocate(
            usd(1),
            &[(user(7), pct("50")), (Beneficiary::CompanyFund, pct("50"))],
        )
        .unwrap();
        assert_eq!(allocations[0].beneficiary, Beneficiary::CompanyFund);
        assert_eq!(minors(&allocations), vec![1, 0]);

        let allocations = allocate(
            usd(2),
            &[(user(9), pct("33.34")), (user(3), pct("33.33")), (user(5), pct("33.33"))],
        )
        .unwrap();
        // floors 0,0,0; fractions 6666, 6666, 6668
        assert_eq!(minors(&allocations), vec![1, 0, 1]);
    }

    #[test]
    fn test_output_is_in_beneficiary_order() {
        let allocations = allocate(
            usd(1000),
            &[
                (user(5), pct("10")),
                (Beneficiary::CompanyFund, pct("70")),
                (user(2), pct("20")),
            ],
        )
        .unwrap();

        let order: Vec<Beneficiary> = allocations.iter().map(|a| a.beneficiary).collect();
        assert_eq!(order, vec![Beneficiary::CompanyFund, user(2), user(5)]);
        assert_eq!(minors(&allocations), vec![700, 200, 100]);
    }

    #[test]
    fn test_zero_share_kept_as_zero_allocation() {
        let allocations = allocate(usd(500), &[(user(1), pct("100")), (user(2), pct("0"))]).unwrap();
        assert_eq!(allocations.len(), 2);
        assert_eq!(minors(&allocations), vec![500, 0]);
    }

    #[test]
    fn test_tiny_share_rounds_to_zero() {
        let allocations = allocate(
            usd(10),
            &[(Beneficiary::CompanyFund, pct("99.99")), (user(1), pct("0.01"))],
        )
        .unwrap();
        assert_eq!(minors(&allocations), vec![10, 0]);
    }

    #[test]
    fn test_currency_carried_through() {
        let amount = Money::from_minor(999, Currency::Local);
        let allocations = allocate(amount, &[(Beneficiary::CompanyFund, SharePercent::HUNDRED)]).unwrap();
        assert_eq!(allocations[0].amount, amount);
    }

    #[test]
    fn test_large_amount_does_not_overflow() {
        let allocations = allocate(
            usd(i64::MAX),
            &[(user(1), pct("50")), (user(2), pct("50"))],
        )
        .unwrap();
        let total: i128 = allocations.iter().map(|a| i128::from(a.amount.minor())).sum();
        assert_eq!(total, i128::from(i64::MAX));
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let shares = [(Beneficiary::CompanyFund, SharePercent::HUNDRED)];
        assert!(matches!(
            allocate(usd(0), &shares),
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            allocate(usd(-5), &shares),
            Err(EngineError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_rejects_shares_not_totalling_hundred() {
        assert!(matches!(
            allocate(usd(100), &[(user(1), pct("60")), (user(2), pct("30"))]),
            Err(EngineError::Configuration(_))
        ));
        assert!(matches!(allocate(usd(100), &[]), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_rejects_duplicate_beneficiary() {
        assert!(matches!(
            allocate(usd(100), &[(user(1), pct("50")), (user(1), pct("50"))]),
            Err(EngineError::Configuration(_))
        ));
    }
}
