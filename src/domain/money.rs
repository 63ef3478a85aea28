//! Amount helpers. Every amount in the ledger is an `i64` in the currency's
//! minor unit (kobo, cents), so splits and fee breakdowns are exact.

use serde::{Deserialize, Serialize};

const BASIS_POINTS: i64 = 10_000;

/// Instructor/platform split of gross revenue, held in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    instructor_bps: i64,
}

impl RevenueSplit {
    pub fn from_rate(rate: f64) -> Self {
        let bps = (rate * BASIS_POINTS as f64).round() as i64;
        Self {
            instructor_bps: bps.clamp(0, BASIS_POINTS),
        }
    }

    pub fn instructor_bps(&self) -> i64 {
        self.instructor_bps
    }

    /// Instructor's part of `amount`, rounded half away from zero.
    pub fn instructor_portion(&self, amount: i64) -> i64 {
        let scaled = amount as i128 * self.instructor_bps as i128;
        let half = BASIS_POINTS as i128 / 2;
        let rounded = if scaled >= 0 {
            (scaled + half) / BASIS_POINTS as i128
        } else {
            (scaled - half) / BASIS_POINTS as i128
        };
        rounded as i64
    }

    pub fn platform_portion(&self, amount: i64) -> i64 {
        amount - self.instructor_portion(amount)
    }
}

/// Fee decomposition of a completed payment.
/// `gateway_fee + platform_fee + net_amount == amount` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub gateway_fee: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
}

impl FeeBreakdown {
    pub fn compute(amount: i64, gateway_fee: i64, split: &RevenueSplit) -> Self {
        let gateway_fee = gateway_fee.clamp(0, amount.max(0));
        let platform_fee = split.platform_portion(amount);
        Self {
            gateway_fee,
            platform_fee,
            net_amount: amount - gateway_fee - platform_fee,
        }
    }

    pub fn total(&self) -> i64 {
        self.gateway_fee + self.platform_fee + self.net_amount
    }
}

/// Minor units to the decimal major amount some providers expect.
pub fn to_major_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

pub fn from_major_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

/// Human readable "₦1,250.00"-style rendering without the symbol.
pub fn format_minor(minor: i64, currency: &str) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let major = abs / 100;
    let cents = abs % 100;

    let digits = major.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{} {}{}.{:02}", currency, sign, grouped, cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seventy_thirty_split() {
        let split = RevenueSplit::from_rate(0.70);
        assert_eq!(split.instructor_bps(), 7_000);
        assert_eq!(split.instructor_portion(20_000), 14_000);
        assert_eq!(split.platform_portion(20_000), 6_000);
    }

    #[test]
    fn split_rounds_half_up_and_conserves_total() {
        let split = RevenueSplit::from_rate(0.70);
        // 0.7 * 15 = 10.5
        assert_eq!(split.instructor_portion(15), 11);
        for amount in [1, 7, 99, 1_001, 123_457] {
            assert_eq!(
                split.instructor_portion(amount) + split.platform_portion(amount),
                amount
            );
        }
    }

    #[test]
    fn negative_amounts_round_symmetrically() {
        let split = RevenueSplit::from_rate(0.70);
        assert_eq!(split.instructor_portion(-15), -11);
    }

    #[test]
    fn fee_breakdown_sums_to_amount() {
        let split = RevenueSplit::from_rate(0.70);
        let fees = FeeBreakdown::compute(1_050_000, 25_750, &split);
        assert_eq!(fees.platform_fee, 315_000);
        assert_eq!(fees.net_amount, 1_050_000 - 25_750 - 315_000);
        assert_eq!(fees.total(), 1_050_000);
    }

    #[test]
    fn gateway_fee_is_clamped_to_amount() {
        let split = RevenueSplit::from_rate(0.70);
        let fees = FeeBreakdown::compute(1_000, 5_000, &split);
        assert_eq!(fees.gateway_fee, 1_000);
        assert_eq!(fees.total(), 1_000);
    }

    #[test]
    fn major_unit_conversion() {
        assert_eq!(to_major_units(150_050), 1500.5);
        assert_eq!(from_major_units(1500.5), 150_050);
        assert_eq!(from_major_units(19.99), 1_999);
    }

    #[test]
    fn formats_with_grouping() {
        assert_eq!(format_minor(123_456_789, "NGN"), "NGN 1,234,567.89");
        assert_eq!(format_minor(-1_400_000, "NGN"), "NGN -14,000.00");
        assert_eq!(format_minor(5, "USD"), "USD 0.05");
    }
}
