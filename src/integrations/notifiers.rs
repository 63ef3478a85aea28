use std::time::Duration;

use async_trait::async_trait;

use crate::config::NotificationConfig;
use crate::error::{AppError, Result};
use crate::integrations::{NotificationEvent, Notifier};

/// Writes every event to the tracing log.
pub struct LogNotifier {
    enabled: bool,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        match event {
            NotificationEvent::PaymentCompleted(payment) => tracing::info!(
                "Payment {} completed for course {} ({} {})",
                payment.reference,
                payment.course_id,
                payment.amount,
                payment.currency
            ),
            NotificationEvent::RefundCompleted { refund, payment, access } => tracing::info!(
                "Refund {} of {} completed on {} (access: {:?})",
                refund.reference,
                refund.amount,
                payment.reference,
                access
            ),
            NotificationEvent::InstructorDebtCreated { instructor_id, amount, .. } => tracing::warn!(
                "Instructor {} now owes {} from refund clawbacks",
                instructor_id,
                amount
            ),
            NotificationEvent::PayoutFailed { payout, reason } => {
                tracing::warn!("Payout {} failed: {}", payout.id, reason)
            }
            other => tracing::info!("Notification: {}", other.name()),
        }
        Ok(())
    }
}

/// POSTs each event as JSON to an operator-configured URL.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationConfig) -> Option<Self> {
        let url = config.webhook_url.clone()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self { http, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::External(format!("notification webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "notification webhook answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::RecordingNotifier;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every event in memory for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<NotificationEvent>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<NotificationEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn notify(&self, event: &NotificationEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }
}
