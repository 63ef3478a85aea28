mod common;

use coursepay::{
    domain::{
        GatewayStatus, PaymentStatus, PayoutStatus, RefundRequest, RefundStatus,
        WebhookDisposition,
    },
    error::AppError,
    gateways::fake::FakeGateway,
    repository::WebhookRepository,
};
use serde_json::{json, Value};
use uuid::Uuid;

use common::{checkout_request, setup, TestApp};

async fn deliver(app: &TestApp, body: &Value) -> anyhow::Result<WebhookDisposition> {
    let payload = serde_json::to_vec(body)?;
    let signature = FakeGateway::sign(&payload);
    Ok(app
        .context
        .webhook_service
        .ingest("paystack", &payload, Some(&signature))
        .await?)
}

fn charge_success(reference: &str, amount: i64) -> Value {
    json!({
        "event": "charge.success",
        "data": {
            "id": 4_099_260_516_i64,
            "reference": reference,
            "amount": amount,
            "currency": "NGN",
            "fees": 300,
            "status": "success",
            "customer": { "email": "learner@example.com" }
        }
    })
}

async fn pending_payment(app: &TestApp, amount: i64) -> anyhow::Result<String> {
    let session = app
        .context
        .payment_service
        .initiate_checkout(checkout_request(Uuid::new_v4(), amount))
        .await?;
    Ok(session.payment.reference)
}

#[tokio::test]
async fn charge_success_completes_payment_once() -> anyhow::Result<()> {
    let app = setup().await?;
    let reference = pending_payment(&app, 20_000).await?;
    let body = charge_success(&reference, 20_000);

    assert_eq!(deliver(&app, &body).await?, WebhookDisposition::Applied);
    let payment = app.context.payment_service.get_payment(&reference).await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.gateway_reference.as_deref(), Some("4099260516"));
    assert_eq!(payment.gateway_fee, 300);

    // Replay of the same delivery
    assert_eq!(deliver(&app, &body).await?, WebhookDisposition::Applied);
    assert_eq!(app.enrollments.activations().len(), 1);
    assert_eq!(app.notifier.names(), vec!["payment_completed"]);

    let logged = app.context.webhook_repo.list_by_reference(&reference).await?;
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|w| w.processed && w.success && w.signature_valid));
    Ok(())
}

#[tokio::test]
async fn webhook_after_verification_changes_nothing() -> anyhow::Result<()> {
    let app = setup().await?;
    let payment = app.completed_payment(Uuid::new_v4(), 20_000, 300).await?;

    assert_eq!(
        deliver(&app, &charge_success(&payment.reference, 20_000)).await?,
        WebhookDisposition::Applied
    );

    let after = app.context.payment_service.get_payment(&payment.reference).await?;
    assert_eq!(after.paid_at, payment.paid_at);
    assert_eq!(app.enrollments.activations().len(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_signature_is_logged_and_dropped() -> anyhow::Result<()> {
    let app = setup().await?;
    let reference = pending_payment(&app, 20_000).await?;
    let payload = serde_json::to_vec(&charge_success(&reference, 20_000))?;

    let disposition = app
        .context
        .webhook_service
        .ingest("paystack", &payload, Some("deadbeef"))
        .await?;
    assert_eq!(disposition, WebhookDisposition::Dropped);

    let missing = app
        .context
        .webhook_service
        .ingest("paystack", &payload, None)
        .await?;
    assert_eq!(missing, WebhookDisposition::Dropped);

    let payment = app.context.payment_service.get_payment(&reference).await?;
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(app.enrollments.activations().is_empty());
    Ok(())
}

#[tokio::test]
async fn unreadable_and_unknown_events_are_acknowledged() -> anyhow::Result<()> {
    let app = setup().await?;

    let payload = b"{not json".to_vec();
    let signature = FakeGateway::sign(&payload);
    let disposition = app
        .context
        .webhook_service
        .ingest("paystack", &payload, Some(&signature))
        .await?;
    assert_eq!(disposition, WebhookDisposition::Malformed);

    let ignored = deliver(
        &app,
        &json!({ "event": "subscription.create", "data": { "id": 1 } }),
    )
    .await?;
    assert_eq!(ignored, WebhookDisposition::Ignored);

    let unknown = deliver(&app, &charge_success("PAY-DOES-NOT-EXIST", 5_000)).await?;
    assert_eq!(unknown, WebhookDisposition::NotFound);
    Ok(())
}

#[tokio::test]
async fn enrollment_outage_asks_for_redelivery() -> anyhow::Result<()> {
    let app = setup().await?;
    let reference = pending_payment(&app, 20_000).await?;
    app.enrollments.fail_activations(true);

    let payload = serde_json::to_vec(&charge_success(&reference, 20_000))?;
    let signature = FakeGateway::sign(&payload);
    let err = app
        .context
        .webhook_service
        .ingest("paystack", &payload, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::External(_)));

    let payment = app.context.payment_service.get_payment(&reference).await?;
    assert_eq!(payment.status, PaymentStatus::Pending);
    let logged = app.context.webhook_repo.list_by_reference(&reference).await?;
    assert_eq!(logged.len(), 1);
    assert!(logged[0].processed);
    assert!(!logged[0].success);
    assert!(logged[0].error_message.is_some());

    // The provider redelivers once the course service is back.
    app.enrollments.fail_activations(false);
    let redelivered = deliver(&app, &charge_success(&reference, 20_000)).await?;
    assert_eq!(redelivered, WebhookDisposition::Applied);
    let payment = app.context.payment_service.get_payment(&reference).await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(app.enrollments.activations().len(), 1);
    Ok(())
}

#[tokio::test]
async fn amount_mismatch_is_acknowledged_as_failed() -> anyhow::Result<()> {
    let app = setup().await?;
    let reference = pending_payment(&app, 20_000).await?;

    let disposition = deliver(&app, &charge_success(&reference, 2_000)).await?;
    assert_eq!(disposition, WebhookDisposition::Failed);

    let payment = app.context.payment_service.get_payment(&reference).await?;
    assert_eq!(payment.status, PaymentStatus::Processing);
    assert!(app.enrollments.activations().is_empty());
    Ok(())
}

#[tokio::test]
async fn charge_failed_fails_payment() -> anyhow::Result<()> {
    let app = setup().await?;
    let reference = pending_payment(&app, 20_000).await?;

    let disposition = deliver(
        &app,
        &json!({
            "event": "charge.failed",
            "data": {
                "id": 77,
                "reference": reference,
                "amount": 20_000,
                "currency": "NGN",
                "gateway_response": "Insufficient funds"
            }
        }),
    )
    .await?;
    assert_eq!(disposition, WebhookDisposition::Applied);

    let payment = app.context.payment_service.get_payment(&reference).await?;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("Insufficient funds"));
    Ok(())
}

#[tokio::test]
async fn refund_processed_completes_pending_refund() -> anyhow::Result<()> {
    let app = setup().await?;
    let payment = app.completed_payment(Uuid::new_v4(), 20_000, 0).await?;
    app.paystack.set_refund_status(GatewayStatus::Pending);
    let refund = app
        .context
        .refund_service
        .request_refund(RefundRequest {
            payment_reference: payment.reference.clone(),
            amount: 20_000,
            reason: "Requested within window".to_string(),
            requested_by: Uuid::new_v4(),
        })
        .await?;
    assert_eq!(refund.status, RefundStatus::Processing);

    let disposition = deliver(
        &app,
        &json!({
            "event": "refund.processed",
            "data": {
                "id": 9_001,
                "transaction_reference": payment.reference,
                "amount": 20_000,
                "currency": "NGN",
                "status": "processed"
            }
        }),
    )
    .await?;
    assert_eq!(disposition, WebhookDisposition::Applied);

    let refund = app.context.refund_service.get_refund(refund.id).await?;
    assert_eq!(refund.status, RefundStatus::Completed);
    let payment = app.context.payment_service.get_payment(&payment.reference).await?;
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(
        app.context
            .payout_service
            .outstanding_debt(payment.instructor_id)
            .await?,
        14_000
    );
    Ok(())
}

#[tokio::test]
async fn transfer_success_completes_payout() -> anyhow::Result<()> {
    let app = setup().await?;
    let instructor_id = Uuid::new_v4();
    app.verified_account(instructor_id, false).await?;
    app.completed_payment(instructor_id, 2_000_000, 0).await?;
    let today = common::today();
    let payout = app
        .context
        .payout_service
        .calculate_for_instructor(instructor_id, today, today)
        .await?;
    let payout = app
        .context
        .payout_service
        .process_payout(payout.id, true)
        .await?;
    assert_eq!(payout.status, PayoutStatus::Processing);
    let reference = payout.transfer_reference.expect("transfer reference");

    let disposition = deliver(
        &app,
        &json!({
            "event": "transfer.success",
            "data": {
                "reference": reference,
                "transfer_code": "TRF_1ptvuv321ahaa7q",
                "amount": payout.net_payout,
                "currency": "NGN"
            }
        }),
    )
    .await?;
    assert_eq!(disposition, WebhookDisposition::Applied);

    let payout = app.context.payout_service.get_payout(payout.id).await?;
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.gateway_transfer_code.as_deref(), Some("TRF_1ptvuv321ahaa7q"));
    Ok(())
}
