//! Contract with the course platform that owns enrollments.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::EnrollmentConfig;
use crate::domain::{AccessDecision, Payment};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrollmentActivation {
    pub payment_id: Uuid,
    pub payment_reference: String,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: i64,
    pub currency: String,
}

impl EnrollmentActivation {
    pub fn for_payment(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            payment_reference: payment.reference.clone(),
            user_id: payment.user_id,
            course_id: payment.course_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
        }
    }
}

#[async_trait]
pub trait EnrollmentService: Send + Sync {
    /// Grants course access for a paid payment and returns the enrollment id.
    /// Must be idempotent on `payment_id`.
    async fn activate_enrollment(&self, activation: &EnrollmentActivation) -> Result<String>;

    /// Completion percentage, 0 to 100.
    async fn course_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<f64>;

    async fn apply_refund_access(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        refund_id: Uuid,
        decision: AccessDecision,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ActivationResponse {
    enrollment_id: String,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    progress_percent: f64,
}

pub struct HttpEnrollmentService {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpEnrollmentService {
    pub fn new(config: &EnrollmentConfig, timeout: Duration) -> Result<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            AppError::Configuration("enrollment.base_url is not set".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| AppError::External(format!("enrollment service: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "enrollment service answered {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl EnrollmentService for HttpEnrollmentService {
    async fn activate_enrollment(&self, activation: &EnrollmentActivation) -> Result<String> {
        let request = self
            .http
            .post(format!("{}/enrollments", self.base_url))
            .json(activation);
        let body: ActivationResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::External(format!("enrollment service: {}", e)))?;
        Ok(body.enrollment_id)
    }

    async fn course_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<f64> {
        let request = self.http.get(format!(
            "{}/enrollments/progress?user_id={}&course_id={}",
            self.base_url, user_id, course_id
        ));
        let body: ProgressResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::External(format!("enrollment service: {}", e)))?;
        Ok(body.progress_percent.clamp(0.0, 100.0))
    }

    async fn apply_refund_access(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        refund_id: Uuid,
        decision: AccessDecision,
    ) -> Result<()> {
        let request = self
            .http
            .post(format!("{}/enrollments/refund-access", self.base_url))
            .json(&json!({
                "user_id": user_id,
                "course_id": course_id,
                "refund_id": refund_id,
                "decision": decision,
            }));
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeEnrollmentService;

#[cfg(any(test, feature = "test-utils"))]
mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        activations: Vec<EnrollmentActivation>,
        access_changes: Vec<(Uuid, AccessDecision)>,
        progress: HashMap<(Uuid, Uuid), f64>,
        fail_activation: bool,
    }

    /// In-memory enrollment service that remembers what it was asked to do.
    #[derive(Default)]
    pub struct FakeEnrollmentService {
        state: Mutex<State>,
    }

    impl FakeEnrollmentService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_activations(&self, fail: bool) {
            self.state.lock().unwrap().fail_activation = fail;
        }

        pub fn set_progress(&self, user_id: Uuid, course_id: Uuid, percent: f64) {
            self.state
                .lock()
                .unwrap()
                .progress
                .insert((user_id, course_id), percent);
        }

        pub fn activations(&self) -> Vec<EnrollmentActivation> {
            self.state.lock().unwrap().activations.clone()
        }

        pub fn access_changes(&self) -> Vec<(Uuid, AccessDecision)> {
            self.state.lock().unwrap().access_changes.clone()
        }
    }

    #[async_trait]
    impl EnrollmentService for FakeEnrollmentService {
        async fn activate_enrollment(&self, activation: &EnrollmentActivation) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            if state.fail_activation {
                return Err(AppError::External("enrollment service unavailable".to_string()));
            }
            state.activations.push(activation.clone());
            Ok(format!("ENR-{}", activation.payment_reference))
        }

        async fn course_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<f64> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .progress
                .get(&(user_id, course_id))
                .copied()
                .unwrap_or(0.0))
        }

        async fn apply_refund_access(
            &self,
            _user_id: Uuid,
            _course_id: Uuid,
            refund_id: Uuid,
            decision: AccessDecision,
        ) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .access_changes
                .push((refund_id, decision));
            Ok(())
        }
    }
}
