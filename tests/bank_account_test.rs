mod common;

use coursepay::{
    domain::VerificationStatus,
    error::AppError,
    gateways::fake::{FakeFailure, FakeOp},
};
use uuid::Uuid;

use common::{bank_account_request, setup, ACCOUNT_NUMBER};

#[tokio::test]
async fn matching_name_verifies_the_account() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    app.paystack.add_account(ACCOUNT_NUMBER, "OKONKWO ADA CHIOMA");
    let service = &app.context.bank_account_service;

    let saved = service
        .save_bank_account(instructor_id, bank_account_request("Ada Chioma Okonkwo"))
        .await?;
    assert_eq!(saved.verification_status, VerificationStatus::Unverified);

    let verified = service.verify_bank_account(instructor_id).await?;
    assert_eq!(verified.verification_status, VerificationStatus::Verified);
    assert_eq!(verified.verified_account_name.as_deref(), Some("OKONKWO ADA CHIOMA"));
    assert_eq!(verified.verification_attempts, 1);
    assert!(verified.verified_at.is_some());

    // Verifying again does not call the bank
    service.verify_bank_account(instructor_id).await?;
    assert_eq!(app.paystack.calls(FakeOp::Resolve), 1);
    Ok(())
}

#[tokio::test]
async fn different_name_fails_verification() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    app.paystack.add_account(ACCOUNT_NUMBER, "EMEKA NWOSU");
    let service = &app.context.bank_account_service;
    service
        .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
        .await?;

    let err = service.verify_bank_account(instructor_id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::NameMismatch { ref resolved, .. } if resolved == "EMEKA NWOSU"
    ));

    let account = service.get_bank_account(instructor_id).await?;
    assert_eq!(account.verification_status, VerificationStatus::Failed);
    assert_eq!(account.verification_attempts, 1);
    assert!(account.verification_error.is_some());
    Ok(())
}

#[tokio::test]
async fn repeated_failures_escalate_to_support() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    app.paystack.add_account(ACCOUNT_NUMBER, "EMEKA NWOSU");
    let service = &app.context.bank_account_service;
    service
        .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
        .await?;

    for _ in 0..3 {
        assert!(service.verify_bank_account(instructor_id).await.is_err());
    }
    let account = service.get_bank_account(instructor_id).await?;
    assert_eq!(account.verification_status, VerificationStatus::RequiresSupport);
    assert_eq!(account.verification_attempts, 3);

    let err = service.verify_bank_account(instructor_id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(app.paystack.calls(FakeOp::Resolve), 3);

    // New details start over
    service
        .save_bank_account(instructor_id, bank_account_request("Emeka Nwosu"))
        .await?;
    let account = service.verify_bank_account(instructor_id).await?;
    assert_eq!(account.verification_status, VerificationStatus::Verified);
    Ok(())
}

#[tokio::test]
async fn resolution_falls_back_to_secondary_provider() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    app.paystack.fail(FakeOp::Resolve, FakeFailure::Unavailable);
    app.flutterwave.add_account(ACCOUNT_NUMBER, "ADA OKONKWO");
    let service = &app.context.bank_account_service;
    service
        .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
        .await?;

    let account = service.verify_bank_account(instructor_id).await?;
    assert_eq!(account.verification_status, VerificationStatus::Verified);
    assert_eq!(app.flutterwave.calls(FakeOp::Resolve), 1);
    Ok(())
}

#[tokio::test]
async fn provider_outage_does_not_count_an_attempt() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    app.paystack.fail(FakeOp::Resolve, FakeFailure::Unavailable);
    app.flutterwave.fail(FakeOp::Resolve, FakeFailure::Unavailable);
    let service = &app.context.bank_account_service;
    service
        .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
        .await?;

    let err = service.verify_bank_account(instructor_id).await.unwrap_err();
    assert!(err.is_indeterminate());

    let account = service.get_bank_account(instructor_id).await?;
    assert_eq!(account.verification_status, VerificationStatus::Unverified);
    assert_eq!(account.verification_attempts, 0);
    Ok(())
}

#[tokio::test]
async fn auto_payout_requires_verification_and_resets_on_change() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    let service = &app.context.bank_account_service;
    service
        .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
        .await?;

    let err = service.set_auto_payout(instructor_id, true).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    app.verified_account(instructor_id, true).await?;
    assert!(service.get_bank_account(instructor_id).await?.auto_payout_enabled);

    let changed = service
        .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
        .await?;
    assert_eq!(changed.verification_status, VerificationStatus::Unverified);
    assert!(!changed.auto_payout_enabled);
    Ok(())
}

#[tokio::test]
async fn malformed_account_details_are_rejected() -> anyhow::Result<()> {
    let app = setup().await?;
    let mut request = bank_account_request("Ada Okonkwo");
    request.account_number = "12345".to_string();

    let err = app
        .context
        .bank_account_service
        .save_bank_account(Uuid::new_v4(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn missing_account_is_not_found() -> anyhow::Result<()> {
    let app = setup().await?;
    let err = app
        .context
        .bank_account_service
        .verify_bank_account(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}
