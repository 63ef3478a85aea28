pub mod gateway;
pub mod money;
pub mod payment;
pub mod refund;
pub mod payout;
pub mod bank_account;
pub mod name_match;
pub mod webhook;

pub use gateway::*;
pub use money::*;
pub use payment::*;
pub use refund::*;
pub use payout::*;
pub use bank_account::*;
pub use webhook::*;
