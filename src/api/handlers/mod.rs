pub mod root;
pub mod payments;
pub mod refunds;
pub mod payouts;
pub mod bank_accounts;
pub mod webhooks;
