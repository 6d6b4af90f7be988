//! eService and Saferpay payment gateway backends
//!
//! Each backend turns a host payment into a bank redirect, verifies what the
//! bank sends back, and moves the payment to its final status.

pub mod api;
pub mod config;
pub mod error;
pub mod payments;
pub mod tasks;
