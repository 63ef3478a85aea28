use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatewayName {
    Paystack,
    Flutterwave,
    Stripe,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Paystack => "paystack",
            GatewayName::Flutterwave => "flutterwave",
            GatewayName::Stripe => "stripe",
        }
    }
}

impl fmt::Display for GatewayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paystack" => Ok(GatewayName::Paystack),
            "flutterwave" => Ok(GatewayName::Flutterwave),
            "stripe" => Ok(GatewayName::Stripe),
            other => Err(AppError::Configuration(format!(
                "unsupported payment gateway: {}",
                other
            ))),
        }
    }
}

/// Shared outcome vocabulary every provider's status strings are folded into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Paystack".parse::<GatewayName>().unwrap(), GatewayName::Paystack);
        assert_eq!(" flutterwave ".parse::<GatewayName>().unwrap(), GatewayName::Flutterwave);
    }

    #[test]
    fn unknown_name_is_a_configuration_error() {
        let err = "monnify".parse::<GatewayName>().unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for name in [GatewayName::Paystack, GatewayName::Flutterwave, GatewayName::Stripe] {
            assert_eq!(name.to_string().parse::<GatewayName>().unwrap(), name);
        }
    }
}
