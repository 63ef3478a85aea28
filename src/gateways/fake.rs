//! Scriptable in-memory gateway for tests.
//!
//! Webhooks use the Paystack body format and an HMAC-SHA512 signature keyed
//! with [`FAKE_WEBHOOK_SECRET`], so tests exercise the real parsing path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{
    ChargeConfirmation, GatewayName, GatewayStatus, InstructorBankAccount, Payment, WebhookEvent,
};
use crate::error::{AppError, Result};
use crate::gateways::{
    paystack, signature, PaymentGateway, PaymentInitialization, RefundInitiation, ResolvedAccount,
    TransferInitiation, TransferRequest,
};

pub const FAKE_WEBHOOK_SECRET: &str = "fake_webhook_secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Initialize,
    Verify,
    Refund,
    Resolve,
    Recipient,
    Transfer,
}

#[derive(Debug, Clone)]
pub enum FakeFailure {
    Unavailable,
    Rejected(String),
    /// Refused locally before any request is sent.
    Invalid(String),
}

impl FakeFailure {
    fn to_error(&self, gateway: GatewayName) -> AppError {
        match self {
            FakeFailure::Unavailable => {
                AppError::GatewayUnavailable(format!("{}: connection timed out", gateway))
            }
            FakeFailure::Rejected(msg) => AppError::GatewayRejected(format!("{}: {}", gateway, msg)),
            FakeFailure::Invalid(msg) => AppError::Validation(format!("{}: {}", gateway, msg)),
        }
    }
}

#[derive(Default)]
struct FakeState {
    charges: HashMap<String, ChargeConfirmation>,
    accounts: HashMap<String, String>,
    failures: HashMap<FakeOp, FakeFailure>,
    refund_status: Option<GatewayStatus>,
    transfer_status: Option<GatewayStatus>,
    refunds: Vec<(String, i64)>,
    transfers: Vec<TransferRequest>,
    call_log: Vec<FakeOp>,
    counter: u64,
}

#[derive(Clone)]
pub struct FakeGateway {
    name: GatewayName,
    inner: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    pub fn new(name: GatewayName) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    /// Scripts what `verify_payment` reports for a payment reference.
    pub fn set_charge(&self, reference: &str, confirmation: ChargeConfirmation) {
        self.inner
            .lock()
            .unwrap()
            .charges
            .insert(reference.to_string(), confirmation);
    }

    pub fn succeed_charge(&self, reference: &str, amount: i64, currency: &str, fee: i64) {
        self.set_charge(reference, successful_charge(amount, currency, fee));
    }

    pub fn add_account(&self, account_number: &str, account_name: &str) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .insert(account_number.to_string(), account_name.to_string());
    }

    pub fn fail(&self, op: FakeOp, failure: FakeFailure) {
        self.inner.lock().unwrap().failures.insert(op, failure);
    }

    pub fn clear_failure(&self, op: FakeOp) {
        self.inner.lock().unwrap().failures.remove(&op);
    }

    pub fn set_refund_status(&self, status: GatewayStatus) {
        self.inner.lock().unwrap().refund_status = Some(status);
    }

    pub fn set_transfer_status(&self, status: GatewayStatus) {
        self.inner.lock().unwrap().transfer_status = Some(status);
    }

    pub fn calls(&self, op: FakeOp) -> usize {
        self.inner
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|logged| **logged == op)
            .count()
    }

    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.inner.lock().unwrap().refunds.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.inner.lock().unwrap().transfers.clone()
    }

    /// Signs a webhook body the way this gateway verifies it.
    pub fn sign(payload: &[u8]) -> String {
        signature::hmac_sha512_hex(FAKE_WEBHOOK_SECRET.as_bytes(), payload)
    }

    fn enter(&self, op: FakeOp) -> Result<u64> {
        let mut state = self.inner.lock().unwrap();
        state.call_log.push(op);
        if let Some(failure) = state.failures.get(&op) {
            return Err(failure.to_error(self.name));
        }
        state.counter += 1;
        Ok(state.counter)
    }
}

pub fn successful_charge(amount: i64, currency: &str, fee: i64) -> ChargeConfirmation {
    ChargeConfirmation {
        status: GatewayStatus::Success,
        amount: Some(amount),
        currency: Some(currency.to_string()),
        gateway_fee: Some(fee),
        gateway_reference: Some(format!("trx_{}", amount)),
        paid_at: None,
        failure_reason: None,
        raw: json!({ "status": "success", "amount": amount, "fees": fee }),
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> GatewayName {
        self.name
    }

    fn supports_transfers(&self) -> bool {
        self.name != GatewayName::Stripe
    }

    async fn initialize_payment(
        &self,
        payment: &Payment,
        _callback_url: Option<&str>,
    ) -> Result<PaymentInitialization> {
        self.enter(FakeOp::Initialize)?;
        Ok(PaymentInitialization {
            authorization_url: format!("https://checkout.test/{}", payment.reference),
            provider_reference: None,
        })
    }

    async fn verify_payment(&self, payment: &Payment) -> Result<ChargeConfirmation> {
        self.enter(FakeOp::Verify)?;
        let state = self.inner.lock().unwrap();
        Ok(state
            .charges
            .get(&payment.reference)
            .cloned()
            .unwrap_or_else(|| ChargeConfirmation {
                status: GatewayStatus::Pending,
                amount: Some(payment.amount),
                currency: Some(payment.currency.clone()),
                gateway_fee: None,
                gateway_reference: None,
                paid_at: None,
                failure_reason: None,
                raw: json!({ "status": "ongoing" }),
            }))
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: Option<&str>) -> bool {
        signature
            .map(|sig| signature::verify_hmac_sha512(FAKE_WEBHOOK_SECRET.as_bytes(), payload, sig))
            .unwrap_or(false)
    }

    fn signature_header(&self) -> &'static str {
        paystack::SIGNATURE_HEADER
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent> {
        paystack::parse_event(payload)
    }

    async fn initiate_refund(
        &self,
        payment: &Payment,
        amount: i64,
        _reason: &str,
    ) -> Result<RefundInitiation> {
        let n = self.enter(FakeOp::Refund)?;
        let mut state = self.inner.lock().unwrap();
        state.refunds.push((payment.reference.clone(), amount));
        Ok(RefundInitiation {
            provider_refund_reference: Some(format!("rf_{}", n)),
            status: state.refund_status.unwrap_or(GatewayStatus::Success),
            raw: json!({ "id": n, "amount": amount }),
        })
    }

    async fn resolve_account(&self, bank_code: &str, account_number: &str) -> Result<ResolvedAccount> {
        self.enter(FakeOp::Resolve)?;
        let state = self.inner.lock().unwrap();
        let account_name = state.accounts.get(account_number).cloned().ok_or_else(|| {
            AppError::GatewayRejected(format!("{}: could not resolve account name", self.name))
        })?;
        Ok(ResolvedAccount {
            account_number: account_number.to_string(),
            account_name,
            bank_code: bank_code.to_string(),
        })
    }

    async fn create_transfer_recipient(&self, account: &InstructorBankAccount) -> Result<String> {
        self.enter(FakeOp::Recipient)?;
        Ok(format!("RCP_{}_{}", self.name, account.account_number))
    }

    async fn initiate_transfer(&self, request: &TransferRequest) -> Result<TransferInitiation> {
        let n = self.enter(FakeOp::Transfer)?;
        let mut state = self.inner.lock().unwrap();
        state.transfers.push(request.clone());
        Ok(TransferInitiation {
            transfer_code: Some(format!("TRF_{}", n)),
            status: state.transfer_status.unwrap_or(GatewayStatus::Pending),
            raw: json!({ "reference": request.reference, "amount": request.amount }),
        })
    }
}
