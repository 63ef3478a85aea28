#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use coursepay::{
    config::PolicyConfig,
    domain::{BankAccountRequest, CheckoutRequest, GatewayName, Payment, PaymentStatus},
    gateways::{fake::FakeGateway, GatewayRegistry},
    integrations::{
        enrollment::FakeEnrollmentService, notifiers::RecordingNotifier, NotificationDispatcher,
    },
    service::ServiceContext,
};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

pub const ACCOUNT_NUMBER: &str = "0123456789";

/// A service context over an in-memory database with scripted gateways.
/// Paystack takes checkouts and is the primary transfer gateway; Flutterwave
/// is the fallback.
pub struct TestApp {
    pub context: Arc<ServiceContext>,
    pub paystack: FakeGateway,
    pub flutterwave: FakeGateway,
    pub enrollments: Arc<FakeEnrollmentService>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn setup() -> anyhow::Result<TestApp> {
    setup_with(PolicyConfig::default()).await
}

pub async fn setup_with(policy: PolicyConfig) -> anyhow::Result<TestApp> {
    // One connection keeps every query on the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let paystack = FakeGateway::new(GatewayName::Paystack);
    let flutterwave = FakeGateway::new(GatewayName::Flutterwave);
    let mut registry = GatewayRegistry::new(
        GatewayName::Paystack,
        GatewayName::Paystack,
        Some(GatewayName::Flutterwave),
    );
    registry.register(Arc::new(paystack.clone()));
    registry.register(Arc::new(flutterwave.clone()));

    let enrollments = Arc::new(FakeEnrollmentService::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let notifications = Arc::new(NotificationDispatcher::new());
    notifications.register(notifier.clone()).await;

    let context = Arc::new(ServiceContext::new(
        pool,
        Arc::new(registry),
        enrollments.clone(),
        notifications,
        policy,
    ));

    Ok(TestApp {
        context,
        paystack,
        flutterwave,
        enrollments,
        notifier,
    })
}

pub fn checkout_request(instructor_id: Uuid, amount: i64) -> CheckoutRequest {
    CheckoutRequest {
        user_id: Uuid::new_v4(),
        course_id: Uuid::new_v4(),
        instructor_id,
        amount,
        currency: None,
        customer_email: "learner@example.com".to_string(),
        customer_name: Some("Ada Learner".to_string()),
        customer_phone: None,
        gateway: None,
        callback_url: None,
    }
}

impl TestApp {
    /// Checks out and confirms a payment through the verify path.
    pub async fn completed_payment(
        &self,
        instructor_id: Uuid,
        amount: i64,
        gateway_fee: i64,
    ) -> anyhow::Result<Payment> {
        let session = self
            .context
            .payment_service
            .initiate_checkout(checkout_request(instructor_id, amount))
            .await?;
        let reference = session.payment.reference;
        self.paystack.succeed_charge(&reference, amount, "NGN", gateway_fee);

        let payment = self
            .context
            .payment_service
            .verify_payment(&reference)
            .await?
            .into_payment();
        assert_eq!(payment.status, PaymentStatus::Completed);
        Ok(payment)
    }

    /// Saves and verifies a bank account both transfer gateways can resolve.
    pub async fn verified_account(&self, instructor_id: Uuid, auto_payout: bool) -> anyhow::Result<()> {
        self.paystack.add_account(ACCOUNT_NUMBER, "ADA OKONKWO");
        self.flutterwave.add_account(ACCOUNT_NUMBER, "ADA OKONKWO");

        let service = &self.context.bank_account_service;
        service
            .save_bank_account(instructor_id, bank_account_request("Ada Okonkwo"))
            .await?;
        service.verify_bank_account(instructor_id).await?;
        if auto_payout {
            service.set_auto_payout(instructor_id, true).await?;
        }
        Ok(())
    }
}

pub fn bank_account_request(account_name: &str) -> BankAccountRequest {
    BankAccountRequest {
        bank_code: "058".to_string(),
        bank_name: Some("GTBank".to_string()),
        account_number: ACCOUNT_NUMBER.to_string(),
        account_name: account_name.to_string(),
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
