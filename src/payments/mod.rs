//! Payment gateway backends
//!
//! This module provides the eService and Saferpay backends behind a common
//! interface, plus the capabilities the host application lends them.

pub mod host;
pub mod providers;
pub mod repository;
pub mod traits;
pub mod types;

pub use traits::GatewayAdapter;
pub use types::{Payment, PaymentId, PaymentOutcome, PaymentStatus};
