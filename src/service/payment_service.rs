use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::PolicyConfig,
    domain::*,
    error::{AppError, Result},
    gateways::GatewayRegistry,
    integrations::{enrollment::EnrollmentService, NotificationDispatcher, NotificationEvent},
    repository::{PaymentCompletion, PaymentRepository},
    service::new_reference,
};

/// Owns the payment state machine. Client verification polls and charge
/// webhooks both end up in [`PaymentService::apply_confirmation`].
pub struct PaymentService {
    repo: Arc<dyn PaymentRepository>,
    gateways: Arc<GatewayRegistry>,
    enrollments: Arc<dyn EnrollmentService>,
    notifications: Arc<NotificationDispatcher>,
    policy: PolicyConfig,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        gateways: Arc<GatewayRegistry>,
        enrollments: Arc<dyn EnrollmentService>,
        notifications: Arc<NotificationDispatcher>,
        policy: PolicyConfig,
    ) -> Self {
        Self { repo, gateways, enrollments, notifications, policy }
    }

    pub async fn initiate_checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        request.validate()?;
        let gateway = self.gateways.checkout(request.gateway.as_deref())?;

        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.policy.currency.clone())
            .to_ascii_uppercase();
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            reference: new_reference("PAY"),
            gateway: gateway.name(),
            gateway_reference: None,
            user_id: request.user_id,
            course_id: request.course_id,
            instructor_id: request.instructor_id,
            amount: request.amount,
            currency,
            gateway_fee: 0,
            platform_fee: 0,
            net_amount: 0,
            status: PaymentStatus::Pending,
            customer_email: request.customer_email.clone(),
            customer_name: request.customer_name.clone(),
            customer_phone: request.customer_phone.clone(),
            authorization_url: None,
            gateway_response: None,
            enrollment_id: None,
            failure_reason: None,
            initiated_at: now,
            paid_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };
        let payment = self.repo.create(payment).await?;

        match gateway
            .initialize_payment(&payment, request.callback_url.as_deref())
            .await
        {
            Ok(init) => {
                let payment = self
                    .repo
                    .record_initialization(
                        payment.id,
                        init.provider_reference.as_deref(),
                        &init.authorization_url,
                    )
                    .await?;
                tracing::info!(
                    "Checkout {} initialised on {} for {}",
                    payment.reference,
                    payment.gateway,
                    format_minor(payment.amount, &payment.currency)
                );
                Ok(CheckoutSession {
                    payment,
                    authorization_url: init.authorization_url,
                })
            }
            Err(AppError::GatewayRejected(reason)) => {
                tracing::warn!("Gateway refused checkout {}: {}", payment.reference, reason);
                self.repo.mark_failed(payment.id, &reason, None).await?;
                Err(AppError::GatewayRejected(reason))
            }
            Err(e) => {
                // Left pending: a late webhook can still settle it.
                tracing::warn!("Checkout {} not initialised: {}", payment.reference, e);
                Err(e)
            }
        }
    }

    pub async fn get_payment(&self, reference: &str) -> Result<Payment> {
        self.repo
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", reference)))
    }

    pub async fn list_payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        self.repo.list_by_user(user_id).await
    }

    /// Asks the gateway for the charge outcome. A gateway that cannot be
    /// reached leaves the payment untouched.
    pub async fn verify_payment(&self, reference: &str) -> Result<ChargeOutcome> {
        let payment = self.get_payment(reference).await?;
        if payment.status.is_settled() {
            return Ok(ChargeOutcome::AlreadySettled(payment));
        }

        let gateway = self.gateways.get(payment.gateway)?;
        let confirmation = gateway.verify_payment(&payment).await?;
        self.apply_confirmation(payment, confirmation).await
    }

    pub async fn cancel_payment(&self, reference: &str) -> Result<Payment> {
        let payment = self.get_payment(reference).await?;
        if self.repo.mark_cancelled(payment.id).await? {
            tracing::info!("Payment {} cancelled by learner", payment.reference);
            return self.reload(payment.id).await;
        }

        let current = self.reload(payment.id).await?;
        if current.status == PaymentStatus::Cancelled {
            Ok(current)
        } else {
            Err(AppError::Validation(format!(
                "payment {} is {} and cannot be cancelled",
                current.reference,
                current.status.as_str()
            )))
        }
    }

    /// Applies a charge confirmation from either channel. Whichever channel
    /// arrives second finds the payment settled and changes nothing.
    pub async fn apply_confirmation(
        &self,
        payment: Payment,
        confirmation: ChargeConfirmation,
    ) -> Result<ChargeOutcome> {
        if payment.status.is_settled() {
            tracing::debug!(
                "Payment {} already {}; confirmation ignored",
                payment.reference,
                payment.status.as_str()
            );
            return Ok(ChargeOutcome::AlreadySettled(payment));
        }

        match confirmation.status {
            GatewayStatus::Success => {
                self.check_charge_matches(&payment, &confirmation).await?;

                let fees = FeeBreakdown::compute(
                    payment.amount,
                    confirmation.gateway_fee.unwrap_or(0),
                    &self.policy.revenue_split(),
                );
                let completion = PaymentCompletion {
                    fees,
                    gateway_reference: confirmation.gateway_reference.clone(),
                    paid_at: confirmation.paid_at.unwrap_or_else(Utc::now),
                    raw: confirmation.raw.clone(),
                };

                match self
                    .repo
                    .complete_and_activate(payment.id, &completion, self.enrollments.as_ref())
                    .await?
                {
                    Some(completed) => {
                        tracing::info!(
                            "Payment {} completed (gateway fee {}, platform fee {}, net {})",
                            completed.reference,
                            fees.gateway_fee,
                            fees.platform_fee,
                            fees.net_amount
                        );
                        self.notifications
                            .dispatch(NotificationEvent::PaymentCompleted(completed.clone()))
                            .await;
                        Ok(ChargeOutcome::Completed(completed))
                    }
                    None => Ok(ChargeOutcome::AlreadySettled(self.reload(payment.id).await?)),
                }
            }
            GatewayStatus::Failed => {
                let reason = confirmation
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "charge declined by gateway".to_string());
                if self
                    .repo
                    .mark_failed(payment.id, &reason, Some(&confirmation.raw))
                    .await?
                {
                    let failed = self.reload(payment.id).await?;
                    tracing::info!("Payment {} failed: {}", failed.reference, reason);
                    self.notifications
                        .dispatch(NotificationEvent::PaymentFailed(failed.clone()))
                        .await;
                    Ok(ChargeOutcome::Failed(failed))
                } else {
                    Ok(ChargeOutcome::AlreadySettled(self.reload(payment.id).await?))
                }
            }
            GatewayStatus::Pending => {
                self.repo.mark_processing(payment.id, None).await?;
                Ok(ChargeOutcome::StillPending(self.reload(payment.id).await?))
            }
        }
    }

    /// Finds the payment a webhook event refers to: our reference first, then
    /// the provider's own id.
    pub async fn find_for_event(
        &self,
        gateway: GatewayName,
        event: &WebhookEvent,
    ) -> Result<Option<Payment>> {
        if let Some(reference) = &event.reference {
            if let Some(payment) = self.repo.find_by_reference(reference).await? {
                return Ok(Some(payment));
            }
        }
        match &event.gateway_reference {
            Some(gateway_reference) => {
                self.repo
                    .find_by_gateway_reference(gateway, gateway_reference)
                    .await
            }
            None => Ok(None),
        }
    }

    async fn check_charge_matches(
        &self,
        payment: &Payment,
        confirmation: &ChargeConfirmation,
    ) -> Result<()> {
        let amount_differs = confirmation.amount.map_or(false, |a| a != payment.amount);
        let currency_differs = confirmation
            .currency
            .as_deref()
            .map_or(false, |c| !c.eq_ignore_ascii_case(&payment.currency));
        if !amount_differs && !currency_differs {
            return Ok(());
        }

        let detail = format!(
            "gateway confirmed {} {} for payment {} of {} {}",
            confirmation.amount.unwrap_or_default(),
            confirmation.currency.as_deref().unwrap_or("?"),
            payment.reference,
            payment.amount,
            payment.currency
        );
        tracing::error!("Charge mismatch: {}", detail);
        self.repo.mark_processing(payment.id, Some(&detail)).await?;
        Err(AppError::ReconciliationConflict(detail))
    }

    async fn reload(&self, id: Uuid) -> Result<Payment> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))
    }
}

/// Charge confirmation carried by a webhook event.
pub fn confirmation_from_event(event: &WebhookEvent, status: GatewayStatus) -> ChargeConfirmation {
    ChargeConfirmation {
        status,
        amount: event.amount,
        currency: event.currency.clone(),
        gateway_fee: event.gateway_fee,
        gateway_reference: event.gateway_reference.clone(),
        paid_at: None,
        failure_reason: event.reason.clone(),
        raw: event.raw.clone(),
    }
}
