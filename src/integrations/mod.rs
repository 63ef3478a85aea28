use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{AccessDecision, InstructorPayout, Payment, PaymentRefund};
use crate::error::Result;

pub mod enrollment;
pub mod notifiers;

/// Facts other systems may want to hear about. Delivered after the ledger
/// change has committed; a failed delivery never rolls anything back.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum NotificationEvent {
    PaymentCompleted(Payment),
    PaymentFailed(Payment),
    RefundCompleted {
        refund: PaymentRefund,
        payment: Payment,
        access: Option<AccessDecision>,
    },
    RefundFailed(PaymentRefund),
    PayoutCompleted(InstructorPayout),
    PayoutFailed {
        payout: InstructorPayout,
        reason: String,
    },
    InstructorDebtCreated {
        instructor_id: Uuid,
        payout_id: Uuid,
        amount: i64,
    },
    DedicatedAccountAssigned {
        customer_email: Option<String>,
        account_number: Option<String>,
        bank_name: Option<String>,
    },
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationEvent::PaymentCompleted(_) => "payment_completed",
            NotificationEvent::PaymentFailed(_) => "payment_failed",
            NotificationEvent::RefundCompleted { .. } => "refund_completed",
            NotificationEvent::RefundFailed(_) => "refund_failed",
            NotificationEvent::PayoutCompleted(_) => "payout_completed",
            NotificationEvent::PayoutFailed { .. } => "payout_failed",
            NotificationEvent::InstructorDebtCreated { .. } => "instructor_debt_created",
            NotificationEvent::DedicatedAccountAssigned { .. } => "dedicated_account_assigned",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}

pub struct NotificationDispatcher {
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            notifiers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, notifier: Arc<dyn Notifier>) {
        if notifier.is_enabled() {
            tracing::info!("Registered notifier: {}", notifier.name());
            self.notifiers.write().await.push(notifier);
        }
    }

    pub async fn dispatch(&self, event: NotificationEvent) {
        let notifiers = self.notifiers.read().await;

        for notifier in notifiers.iter() {
            if !notifier.is_enabled() {
                continue;
            }

            match notifier.notify(&event).await {
                Ok(_) => {
                    tracing::debug!("Notifier {} delivered {}", notifier.name(), event.name());
                }
                Err(e) => {
                    tracing::error!(
                        "Notifier {} failed to deliver {}: {:?}",
                        notifier.name(),
                        event.name(),
                        e
                    );
                }
            }
        }
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::integrations::notifiers::RecordingNotifier;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn name(&self) -> &str {
            "failing"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn notify(&self, _event: &NotificationEvent) -> Result<()> {
            Err(AppError::External("down".into()))
        }
    }

    #[tokio::test]
    async fn failing_notifier_does_not_stop_the_others() {
        let dispatcher = NotificationDispatcher::new();
        let recorder = Arc::new(RecordingNotifier::new());
        dispatcher.register(Arc::new(FailingNotifier)).await;
        dispatcher.register(recorder.clone()).await;

        dispatcher
            .dispatch(NotificationEvent::InstructorDebtCreated {
                instructor_id: Uuid::new_v4(),
                payout_id: Uuid::new_v4(),
                amount: 14_000,
            })
            .await;

        assert_eq!(recorder.names(), vec!["instructor_debt_created"]);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = NotificationEvent::DedicatedAccountAssigned {
            customer_email: Some("learner@example.com".into()),
            account_number: Some("9930000001".into()),
            bank_name: Some("Wema Bank".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "dedicated_account_assigned");
        assert_eq!(value["data"]["account_number"], "9930000001");
    }
}
