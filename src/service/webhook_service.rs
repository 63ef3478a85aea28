use std::sync::Arc;

use crate::{
    domain::*,
    error::Result,
    gateways::GatewayRegistry,
    integrations::{NotificationDispatcher, NotificationEvent},
    repository::WebhookRepository,
    service::{
        payment_service::{confirmation_from_event, PaymentService},
        payout_service::PayoutService,
        refund_service::RefundService,
    },
};

/// Authenticates, logs and dispatches provider callbacks. Every request is
/// written to the webhook log before anything else happens to it.
pub struct WebhookService {
    repo: Arc<dyn WebhookRepository>,
    gateways: Arc<GatewayRegistry>,
    payments: Arc<PaymentService>,
    refunds: Arc<RefundService>,
    payouts: Arc<PayoutService>,
    notifications: Arc<NotificationDispatcher>,
}

impl WebhookService {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        gateways: Arc<GatewayRegistry>,
        payments: Arc<PaymentService>,
        refunds: Arc<RefundService>,
        payouts: Arc<PayoutService>,
        notifications: Arc<NotificationDispatcher>,
    ) -> Self {
        Self { repo, gateways, payments, refunds, payouts, notifications }
    }

    /// Header the named gateway signs its callbacks with.
    pub fn signature_header(&self, gateway_name: &str) -> Result<&'static str> {
        Ok(self.gateways.by_name(gateway_name)?.signature_header())
    }

    /// Retryable failures (storage, course service, gateway outages) come
    /// back as errors so the provider redelivers; everything else is
    /// acknowledged.
    pub async fn ingest(
        &self,
        gateway_name: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookDisposition> {
        let gateway = self.gateways.by_name(gateway_name)?;
        let name = gateway.name();
        let body = String::from_utf8_lossy(payload).into_owned();

        if !gateway.verify_webhook_signature(payload, signature) {
            tracing::warn!("Dropped {} webhook with an invalid signature", name);
            let record = PaymentWebhook::received(name, "unverified", None, body, false);
            self.repo.record(&record).await?;
            self.repo
                .mark_processed(record.id, false, Some("invalid signature"))
                .await?;
            return Ok(WebhookDisposition::Dropped);
        }

        let event = match gateway.parse_webhook_event(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Unreadable {} webhook: {}", name, e);
                let record = PaymentWebhook::received(name, "malformed", None, body, true);
                self.repo.record(&record).await?;
                self.repo
                    .mark_processed(record.id, false, Some(&e.to_string()))
                    .await?;
                return Ok(WebhookDisposition::Malformed);
            }
        };

        let record = PaymentWebhook::received(
            name,
            event.event_type.clone(),
            event.reference.clone(),
            body,
            true,
        );
        self.repo.record(&record).await?;

        let disposition = match self.dispatch(name, &event).await {
            Ok(disposition) => disposition,
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    "{} webhook {} not applied, asking for redelivery: {}",
                    name,
                    event.event_type,
                    e
                );
                self.repo
                    .mark_processed(record.id, false, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
            Err(e) => {
                tracing::error!("{} webhook {} failed: {}", name, event.event_type, e);
                self.repo
                    .mark_processed(record.id, false, Some(&e.to_string()))
                    .await?;
                return Ok(WebhookDisposition::Failed);
            }
        };

        let note = match disposition {
            WebhookDisposition::NotFound => Some("no matching record"),
            WebhookDisposition::Ignored => Some("event type not handled"),
            _ => None,
        };
        self.repo.mark_processed(record.id, true, note).await?;
        tracing::debug!("{} webhook {} -> {:?}", name, event.event_type, disposition);
        Ok(disposition)
    }

    async fn dispatch(&self, gateway: GatewayName, event: &WebhookEvent) -> Result<WebhookDisposition> {
        match event.kind {
            WebhookEventKind::ChargeSucceeded | WebhookEventKind::ChargeFailed => {
                let payment = match self.payments.find_for_event(gateway, event).await? {
                    Some(payment) => payment,
                    None => return Ok(self.not_found(event)),
                };
                let status = if event.kind == WebhookEventKind::ChargeSucceeded {
                    GatewayStatus::Success
                } else {
                    GatewayStatus::Failed
                };
                self.payments
                    .apply_confirmation(payment, confirmation_from_event(event, status))
                    .await?;
                Ok(WebhookDisposition::Applied)
            }
            WebhookEventKind::TransferSucceeded => {
                let Some(reference) = event.reference.as_deref() else {
                    return Ok(self.not_found(event));
                };
                match self
                    .payouts
                    .confirm_transfer(reference, event.gateway_reference.as_deref())
                    .await?
                {
                    Some(_) => Ok(WebhookDisposition::Applied),
                    None => Ok(self.not_found(event)),
                }
            }
            WebhookEventKind::TransferFailed => {
                let Some(reference) = event.reference.as_deref() else {
                    return Ok(self.not_found(event));
                };
                let reason = event.reason.as_deref().unwrap_or("transfer failed at gateway");
                match self.payouts.fail_transfer(reference, reason).await? {
                    Some(_) => Ok(WebhookDisposition::Applied),
                    None => Ok(self.not_found(event)),
                }
            }
            WebhookEventKind::RefundProcessed | WebhookEventKind::RefundFailed => {
                let processed = event.kind == WebhookEventKind::RefundProcessed;
                match self.refunds.apply_refund_event(gateway, event, processed).await? {
                    Some(_) => Ok(WebhookDisposition::Applied),
                    None => Ok(self.not_found(event)),
                }
            }
            WebhookEventKind::DedicatedAccountAssigned => {
                self.notifications
                    .dispatch(NotificationEvent::DedicatedAccountAssigned {
                        customer_email: event.customer_email.clone(),
                        account_number: event.account_number.clone(),
                        bank_name: event.bank_name.clone(),
                    })
                    .await;
                Ok(WebhookDisposition::Applied)
            }
            WebhookEventKind::Unrecognized => {
                tracing::info!("Ignoring {} event {}", gateway, event.event_type);
                Ok(WebhookDisposition::Ignored)
            }
        }
    }

    fn not_found(&self, event: &WebhookEvent) -> WebhookDisposition {
        tracing::warn!(
            "No record for {} event (reference {:?}, provider id {:?})",
            event.event_type,
            event.reference,
            event.gateway_reference
        );
        WebhookDisposition::NotFound
    }
}
