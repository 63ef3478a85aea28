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
    repository::{PaymentRepository, RefundRepository, RefundSettlement},
    service::new_reference,
};

pub struct RefundService {
    refunds: Arc<dyn RefundRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateways: Arc<GatewayRegistry>,
    enrollments: Arc<dyn EnrollmentService>,
    notifications: Arc<NotificationDispatcher>,
    policy: PolicyConfig,
}

impl RefundService {
    pub fn new(
        refunds: Arc<dyn RefundRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateways: Arc<GatewayRegistry>,
        enrollments: Arc<dyn EnrollmentService>,
        notifications: Arc<NotificationDispatcher>,
        policy: PolicyConfig,
    ) -> Self {
        Self { refunds, payments, gateways, enrollments, notifications, policy }
    }

    /// Creates a refund claim. Small refunds go straight to the gateway;
    /// larger ones wait in `pending_review` for an operator.
    pub async fn request_refund(&self, request: RefundRequest) -> Result<PaymentRefund> {
        request.validate()?;
        let payment = self
            .payments
            .find_by_reference(&request.payment_reference)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Payment {} not found", request.payment_reference))
            })?;

        let auto_approve = request.amount <= self.policy.refund_auto_approve_ceiling;
        let now = Utc::now();
        let refund = PaymentRefund {
            id: Uuid::new_v4(),
            reference: new_reference("RF"),
            payment_id: payment.id,
            amount: request.amount,
            reason: request.reason.clone(),
            status: if auto_approve {
                RefundStatus::Approved
            } else {
                RefundStatus::PendingReview
            },
            gateway_refund_reference: None,
            failure_reason: None,
            requested_by: request.requested_by,
            reviewed_by: None,
            review_note: None,
            requested_at: now,
            reviewed_at: auto_approve.then_some(now),
            processed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let refund = self
            .refunds
            .create_checked(refund, self.policy.refund_window_days)
            .await?;

        if !auto_approve {
            tracing::info!(
                "Refund {} of {} on {} awaits review",
                refund.reference,
                format_minor(refund.amount, &payment.currency),
                payment.reference
            );
            return Ok(refund);
        }

        self.execute(refund, payment).await
    }

    pub async fn approve_refund(&self, id: Uuid, review: RefundReview) -> Result<PaymentRefund> {
        let refund = self.get_refund(id).await?;
        if !self
            .refunds
            .mark_approved(id, review.reviewer_id, review.note.as_deref())
            .await?
        {
            return Err(AppError::Validation(format!(
                "refund {} is {} and cannot be approved",
                refund.reference,
                refund.status.as_str()
            )));
        }
        tracing::info!("Refund {} approved by {}", refund.reference, review.reviewer_id);

        let refund = self.get_refund(id).await?;
        let payment = self.payment_for(&refund).await?;
        self.execute(refund, payment).await
    }

    pub async fn reject_refund(&self, id: Uuid, review: RefundReview) -> Result<PaymentRefund> {
        let refund = self.get_refund(id).await?;
        if !self
            .refunds
            .mark_cancelled(id, review.reviewer_id, review.note.as_deref())
            .await?
        {
            return Err(AppError::Validation(format!(
                "refund {} is {} and cannot be rejected",
                refund.reference,
                refund.status.as_str()
            )));
        }
        tracing::info!("Refund {} rejected by {}", refund.reference, review.reviewer_id);
        self.get_refund(id).await
    }

    /// Sends an approved refund to the gateway that took the charge.
    async fn execute(&self, refund: PaymentRefund, payment: Payment) -> Result<PaymentRefund> {
        let gateway = self.gateways.get(payment.gateway)?;
        if !self.refunds.claim_for_execution(refund.id).await? {
            return self.get_refund(refund.id).await;
        }

        match gateway
            .initiate_refund(&payment, refund.amount, &refund.reason)
            .await
        {
            Ok(initiation) => match initiation.status {
                GatewayStatus::Success => {
                    self.confirm_refund(refund.id, initiation.provider_refund_reference.as_deref())
                        .await
                }
                GatewayStatus::Pending => {
                    self.refunds
                        .mark_processing(refund.id, initiation.provider_refund_reference.as_deref())
                        .await?;
                    tracing::info!(
                        "Refund {} accepted by {}; awaiting confirmation",
                        refund.reference,
                        gateway.name()
                    );
                    self.get_refund(refund.id).await
                }
                GatewayStatus::Failed => {
                    self.fail_refund(refund.id, "gateway reported the refund as failed")
                        .await
                }
            },
            Err(AppError::GatewayRejected(reason)) => self.fail_refund(refund.id, &reason).await,
            Err(e) if e.is_indeterminate() => {
                tracing::warn!(
                    "Refund {} outcome unknown, left processing: {}",
                    refund.reference,
                    e
                );
                self.get_refund(refund.id).await
            }
            Err(e) => {
                // Nothing reached the gateway; close the claim so the payment
                // can take another refund.
                self.fail_refund(refund.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Settles a refund the gateway confirmed, runs the deduction cascade and
    /// applies the access policy. Confirming an already terminal refund is a
    /// no-op.
    pub async fn confirm_refund(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
    ) -> Result<PaymentRefund> {
        let split = self.policy.revenue_split();
        let settlement = match self
            .refunds
            .complete_with_deduction(id, gateway_reference, &split)
            .await?
        {
            Some(settlement) => settlement,
            None => {
                let refund = self.get_refund(id).await?;
                if refund.status != RefundStatus::Completed {
                    tracing::warn!(
                        "Confirmation for refund {} ignored; it is {}",
                        refund.reference,
                        refund.status.as_str()
                    );
                }
                return Ok(refund);
            }
        };

        let deduction = &settlement.deduction;
        tracing::info!(
            "Refund {} completed; clawback {} ({} from pending payouts, {} as debt)",
            settlement.refund.reference,
            deduction.requested,
            deduction.deducted_from_pending,
            deduction.debt_amount
        );

        let access = if settlement.payment.status == PaymentStatus::Refunded {
            self.apply_access_policy(&settlement).await
        } else {
            None
        };

        self.notifications
            .dispatch(NotificationEvent::RefundCompleted {
                refund: settlement.refund.clone(),
                payment: settlement.payment.clone(),
                access,
            })
            .await;
        if let Some(payout_id) = deduction.debt_payout_id {
            self.notifications
                .dispatch(NotificationEvent::InstructorDebtCreated {
                    instructor_id: deduction.instructor_id,
                    payout_id,
                    amount: deduction.debt_amount,
                })
                .await;
        }

        Ok(settlement.refund)
    }

    pub async fn fail_refund(&self, id: Uuid, reason: &str) -> Result<PaymentRefund> {
        if self.refunds.mark_failed(id, reason).await? {
            let refund = self.get_refund(id).await?;
            tracing::warn!("Refund {} failed: {}", refund.reference, reason);
            self.notifications
                .dispatch(NotificationEvent::RefundFailed(refund.clone()))
                .await;
            return Ok(refund);
        }
        self.get_refund(id).await
    }

    pub async fn get_refund(&self, id: Uuid) -> Result<PaymentRefund> {
        self.refunds
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Refund {} not found", id)))
    }

    pub async fn list_refunds_for_payment(&self, payment_reference: &str) -> Result<Vec<PaymentRefund>> {
        let payment = self
            .payments
            .find_by_reference(payment_reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_reference)))?;
        self.refunds.list_for_payment(payment.id).await
    }

    /// Applies a refund-processed or refund-failed webhook. `None` when no
    /// open or matching refund exists.
    pub async fn apply_refund_event(
        &self,
        gateway: GatewayName,
        event: &WebhookEvent,
        processed: bool,
    ) -> Result<Option<PaymentRefund>> {
        let (refund, payment) = match self.locate(gateway, event).await? {
            Some(found) => found,
            None => return Ok(None),
        };

        if processed {
            // Some providers only name the charge, not the refund.
            let provider_reference = event
                .gateway_reference
                .as_deref()
                .filter(|r| payment.gateway_reference.as_deref() != Some(*r));
            self.confirm_refund(refund.id, provider_reference).await.map(Some)
        } else {
            let reason = event.reason.as_deref().unwrap_or("refund failed at gateway");
            self.fail_refund(refund.id, reason).await.map(Some)
        }
    }

    /// Refund an event refers to: by the provider's refund id, otherwise the
    /// open refund on the charge it names.
    async fn locate(
        &self,
        gateway: GatewayName,
        event: &WebhookEvent,
    ) -> Result<Option<(PaymentRefund, Payment)>> {
        if let Some(gateway_reference) = &event.gateway_reference {
            if let Some(refund) = self.refunds.find_by_gateway_reference(gateway_reference).await? {
                let payment = self.payment_for(&refund).await?;
                return Ok(Some((refund, payment)));
            }
        }

        let mut payment = None;
        if let Some(reference) = &event.reference {
            payment = self.payments.find_by_reference(reference).await?;
        }
        if payment.is_none() {
            if let Some(gateway_reference) = &event.gateway_reference {
                payment = self
                    .payments
                    .find_by_gateway_reference(gateway, gateway_reference)
                    .await?;
            }
        }

        let payment = match payment {
            Some(payment) => payment,
            None => return Ok(None),
        };
        Ok(self
            .refunds
            .find_open_for_payment(payment.id)
            .await?
            .map(|refund| (refund, payment)))
    }

    async fn apply_access_policy(&self, settlement: &RefundSettlement) -> Option<AccessDecision> {
        let payment = &settlement.payment;
        let progress = match self
            .enrollments
            .course_progress(payment.user_id, payment.course_id)
            .await
        {
            Ok(progress) => progress,
            Err(e) => {
                tracing::error!(
                    "Could not read course progress for refund {}: {}",
                    settlement.refund.reference,
                    e
                );
                return None;
            }
        };

        let decision = decide_access(progress, self.policy.access_retention_progress_percent);
        if let Err(e) = self
            .enrollments
            .apply_refund_access(payment.user_id, payment.course_id, settlement.refund.id, decision)
            .await
        {
            tracing::error!(
                "Could not apply {:?} for refund {}: {}",
                decision,
                settlement.refund.reference,
                e
            );
        }
        Some(decision)
    }

    async fn payment_for(&self, refund: &PaymentRefund) -> Result<Payment> {
        self.payments
            .find_by_id(refund.payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", refund.payment_id)))
    }
}
