pub mod payment_service;
pub mod refund_service;
pub mod payout_service;
pub mod bank_account_service;
pub mod webhook_service;

use std::{sync::Arc, time::Duration};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

use crate::config::{PolicyConfig, Settings};
use crate::error::Result;
use crate::gateways::GatewayRegistry;
use crate::integrations::{
    enrollment::{EnrollmentService, HttpEnrollmentService},
    notifiers::{LogNotifier, WebhookNotifier},
    NotificationDispatcher,
};
use crate::repository::*;
use bank_account_service::BankAccountService;
use payment_service::PaymentService;
use payout_service::PayoutService;
use refund_service::RefundService;
use webhook_service::WebhookService;

pub struct ServiceContext {
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub refund_repo: Arc<dyn RefundRepository>,
    pub payout_repo: Arc<dyn PayoutRepository>,
    pub bank_account_repo: Arc<dyn BankAccountRepository>,
    pub webhook_repo: Arc<dyn WebhookRepository>,
    pub gateways: Arc<GatewayRegistry>,
    pub enrollments: Arc<dyn EnrollmentService>,
    pub notifications: Arc<NotificationDispatcher>,
    pub payment_service: Arc<PaymentService>,
    pub refund_service: Arc<RefundService>,
    pub payout_service: Arc<PayoutService>,
    pub bank_account_service: Arc<BankAccountService>,
    pub webhook_service: Arc<WebhookService>,
    pub policy: PolicyConfig,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        gateways: Arc<GatewayRegistry>,
        enrollments: Arc<dyn EnrollmentService>,
        notifications: Arc<NotificationDispatcher>,
        policy: PolicyConfig,
    ) -> Self {
        // Repositories
        let payment_repo: Arc<dyn PaymentRepository> =
            Arc::new(SqlitePaymentRepository::new(db_pool.clone()));
        let refund_repo: Arc<dyn RefundRepository> =
            Arc::new(SqliteRefundRepository::new(db_pool.clone()));
        let payout_repo: Arc<dyn PayoutRepository> =
            Arc::new(SqlitePayoutRepository::new(db_pool.clone()));
        let bank_account_repo: Arc<dyn BankAccountRepository> =
            Arc::new(SqliteBankAccountRepository::new(db_pool.clone()));
        let webhook_repo: Arc<dyn WebhookRepository> =
            Arc::new(SqliteWebhookRepository::new(db_pool.clone()));

        // Services, leaves first
        let bank_account_service = Arc::new(BankAccountService::new(
            bank_account_repo.clone(),
            gateways.clone(),
            policy.clone(),
        ));
        let payment_service = Arc::new(PaymentService::new(
            payment_repo.clone(),
            gateways.clone(),
            enrollments.clone(),
            notifications.clone(),
            policy.clone(),
        ));
        let refund_service = Arc::new(RefundService::new(
            refund_repo.clone(),
            payment_repo.clone(),
            gateways.clone(),
            enrollments.clone(),
            notifications.clone(),
            policy.clone(),
        ));
        let payout_service = Arc::new(PayoutService::new(
            payout_repo.clone(),
            payment_repo.clone(),
            bank_account_service.clone(),
            gateways.clone(),
            notifications.clone(),
            policy.clone(),
        ));
        let webhook_service = Arc::new(WebhookService::new(
            webhook_repo.clone(),
            gateways.clone(),
            payment_service.clone(),
            refund_service.clone(),
            payout_service.clone(),
            notifications.clone(),
        ));

        Self {
            payment_repo,
            refund_repo,
            payout_repo,
            bank_account_repo,
            webhook_repo,
            gateways,
            enrollments,
            notifications,
            payment_service,
            refund_service,
            payout_service,
            bank_account_service,
            webhook_service,
            policy,
            db_pool,
        }
    }

    /// Connects the database, runs migrations and wires the configured
    /// gateways, enrollment client and notifiers.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.url)
            .await?;

        sqlx::migrate!("./migrations").run(&db_pool).await?;

        let gateways = Arc::new(GatewayRegistry::from_settings(
            &settings.gateways,
            &settings.server.base_url,
        )?);

        let enrollments: Arc<dyn EnrollmentService> = Arc::new(HttpEnrollmentService::new(
            &settings.enrollment,
            Duration::from_secs(settings.gateways.request_timeout_secs),
        )?);

        let notifications = Arc::new(NotificationDispatcher::new());
        notifications
            .register(Arc::new(LogNotifier::new(settings.notifications.log_events)))
            .await;
        if let Some(webhook) = WebhookNotifier::new(&settings.notifications) {
            notifications.register(Arc::new(webhook)).await;
        }

        Ok(Self::new(
            db_pool,
            gateways,
            enrollments,
            notifications,
            settings.policy.clone(),
        ))
    }
}

/// Fresh idempotency reference such as `PAY-3F2A9C...`.
pub fn new_reference(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple().to_string().to_uppercase())
}
