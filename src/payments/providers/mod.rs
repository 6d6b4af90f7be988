//! Gateway backend implementations
//!
//! Concrete implementations of the GatewayAdapter trait for each bank.

pub mod eservice;
pub mod saferpay;

pub use eservice::EserviceAdapter;
pub use saferpay::SaferpayAdapter;
