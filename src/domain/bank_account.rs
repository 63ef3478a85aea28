use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::GatewayName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructorBankAccount {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub bank_code: String,
    pub bank_name: Option<String>,
    pub account_number: String,
    pub account_name: String,
    pub verified_account_name: Option<String>,
    pub verification_status: VerificationStatus,
    pub verification_attempts: i64,
    pub last_verification_attempt: Option<DateTime<Utc>>,
    pub verification_error: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub paystack_recipient_code: Option<String>,
    pub flutterwave_beneficiary_id: Option<String>,
    pub auto_payout_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstructorBankAccount {
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }

    pub fn recipient_for(&self, gateway: GatewayName) -> Option<&str> {
        match gateway {
            GatewayName::Paystack => self.paystack_recipient_code.as_deref(),
            GatewayName::Flutterwave => self.flutterwave_beneficiary_id.as_deref(),
            GatewayName::Stripe => None,
        }
    }

    /// Masked for logs and API responses: `******7890`.
    pub fn masked_account_number(&self) -> String {
        let visible = self.account_number.len().saturating_sub(4);
        format!("{}{}", "*".repeat(visible), &self.account_number[visible..])
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Failed,
    RequiresSupport,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
            VerificationStatus::RequiresSupport => "requires_support",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unverified" => Some(VerificationStatus::Unverified),
            "verified" => Some(VerificationStatus::Verified),
            "failed" => Some(VerificationStatus::Failed),
            "requires_support" => Some(VerificationStatus::RequiresSupport),
            _ => None,
        }
    }
}

fn validate_nuban(account_number: &str) -> Result<(), validator::ValidationError> {
    if account_number.len() == 10 && account_number.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("nuban");
        err.message = Some("must be a 10 digit account number".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BankAccountRequest {
    #[validate(length(min = 3, max = 10, message = "must be a bank code"))]
    pub bank_code: String,
    pub bank_name: Option<String>,
    #[validate(custom(function = "validate_nuban"))]
    pub account_number: String,
    #[validate(length(min = 2, max = 200, message = "must not be empty"))]
    pub account_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nuban_must_be_ten_digits() {
        let mut request = BankAccountRequest {
            bank_code: "058".into(),
            bank_name: Some("GTBank".into()),
            account_number: "0123456789".into(),
            account_name: "Ada Obi".into(),
        };
        assert!(request.validate().is_ok());

        request.account_number = "01234".into();
        assert!(request.validate().is_err());

        request.account_number = "01234567ab".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn verification_status_round_trips() {
        for status in [
            VerificationStatus::Unverified,
            VerificationStatus::Verified,
            VerificationStatus::Failed,
            VerificationStatus::RequiresSupport,
        ] {
            assert_eq!(VerificationStatus::parse(status.as_str()), Some(status));
        }
    }
}
