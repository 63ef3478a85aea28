use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::PolicyConfig,
    domain::{name_match::name_similarity, BankAccountRequest, InstructorBankAccount, VerificationStatus},
    error::{AppError, Result},
    gateways::{GatewayRegistry, PaymentGateway, ResolvedAccount},
    repository::BankAccountRepository,
};

/// Certifies instructor payout destinations against the banks' own records.
pub struct BankAccountService {
    repo: Arc<dyn BankAccountRepository>,
    gateways: Arc<GatewayRegistry>,
    policy: PolicyConfig,
}

impl BankAccountService {
    pub fn new(
        repo: Arc<dyn BankAccountRepository>,
        gateways: Arc<GatewayRegistry>,
        policy: PolicyConfig,
    ) -> Self {
        Self { repo, gateways, policy }
    }

    pub async fn save_bank_account(
        &self,
        instructor_id: Uuid,
        request: BankAccountRequest,
    ) -> Result<InstructorBankAccount> {
        request.validate()?;
        let account = self.repo.upsert(instructor_id, &request).await?;
        tracing::info!(
            "Bank account {} saved for instructor {}; verification reset",
            account.masked_account_number(),
            instructor_id
        );
        Ok(account)
    }

    pub async fn get_bank_account(&self, instructor_id: Uuid) -> Result<InstructorBankAccount> {
        self.repo.find_by_instructor(instructor_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("No bank account for instructor {}", instructor_id))
        })
    }

    /// Resolves the account with the banks and compares the legal name with
    /// the claimed one. Attempts are only counted when a provider gave a
    /// definite answer.
    pub async fn verify_bank_account(&self, instructor_id: Uuid) -> Result<InstructorBankAccount> {
        let account = self.get_bank_account(instructor_id).await?;
        match account.verification_status {
            VerificationStatus::Verified => return Ok(account),
            VerificationStatus::RequiresSupport => {
                return Err(AppError::Validation(format!(
                    "bank account {} needs manual review by support",
                    account.masked_account_number()
                )))
            }
            VerificationStatus::Unverified | VerificationStatus::Failed => {}
        }

        let resolved = match self.resolve(&account).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_indeterminate() => return Err(e),
            Err(AppError::GatewayRejected(reason)) => {
                let attempted = self.repo.record_attempt(account.id).await?;
                self.repo
                    .mark_failed(attempted.id, self.status_after_failure(&attempted), &reason, None)
                    .await?;
                return Err(AppError::GatewayRejected(reason));
            }
            Err(e) => return Err(e),
        };

        let attempted = self.repo.record_attempt(account.id).await?;
        let score = name_similarity(&attempted.account_name, &resolved.account_name);
        if score >= self.policy.name_match_threshold {
            tracing::info!(
                "Bank account {} verified for instructor {} (similarity {:.2})",
                attempted.masked_account_number(),
                instructor_id,
                score
            );
            return self.repo.mark_verified(attempted.id, &resolved.account_name).await;
        }

        let mismatch = AppError::NameMismatch {
            claimed: attempted.account_name.clone(),
            resolved: resolved.account_name.clone(),
        };
        tracing::warn!(
            "Bank account {} failed verification (similarity {:.2})",
            attempted.masked_account_number(),
            score
        );
        self.repo
            .mark_failed(
                attempted.id,
                self.status_after_failure(&attempted),
                &mismatch.to_string(),
                Some(&resolved.account_name),
            )
            .await?;
        Err(mismatch)
    }

    pub async fn set_auto_payout(&self, instructor_id: Uuid, enabled: bool) -> Result<InstructorBankAccount> {
        let account = self.get_bank_account(instructor_id).await?;
        if enabled && !account.is_verified() {
            return Err(AppError::Validation(
                "auto payout requires a verified bank account".to_string(),
            ));
        }
        self.repo.set_auto_payout(account.id, enabled).await
    }

    /// Recipient id for `gateway`, registering the account with it on first use.
    pub async fn ensure_recipient(
        &self,
        account: &InstructorBankAccount,
        gateway: &dyn PaymentGateway,
    ) -> Result<String> {
        if let Some(existing) = account.recipient_for(gateway.name()) {
            return Ok(existing.to_string());
        }

        let recipient = gateway.create_transfer_recipient(account).await?;
        self.repo
            .set_recipient(account.id, gateway.name(), &recipient)
            .await?;
        tracing::info!(
            "Registered {} as {} recipient {}",
            account.masked_account_number(),
            gateway.name(),
            recipient
        );
        Ok(recipient)
    }

    /// Primary resolver first; any provider error moves on to the next one.
    async fn resolve(&self, account: &InstructorBankAccount) -> Result<ResolvedAccount> {
        let chain = self.gateways.transfer_chain();
        if chain.is_empty() {
            return Err(AppError::Configuration(
                "no gateway can resolve bank accounts".to_string(),
            ));
        }

        let mut last_error = None;
        for gateway in chain {
            match gateway
                .resolve_account(&account.bank_code, &account.account_number)
                .await
            {
                Ok(resolved) => return Ok(resolved),
                Err(e) => {
                    tracing::warn!("{} could not resolve account: {}", gateway.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Internal("account resolution produced no result".to_string())
        }))
    }

    fn status_after_failure(&self, account: &InstructorBankAccount) -> VerificationStatus {
        if account.verification_attempts >= self.policy.max_verification_attempts {
            VerificationStatus::RequiresSupport
        } else {
            VerificationStatus::Failed
        }
    }
}
