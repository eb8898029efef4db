//! Integration Tests for the Relay Consumer
//!
//! This crate contains various test modules:
//!
//! - `dispatch_tests`: Unary and subscription relays, verification failures, timeouts and
//!   session release on every path
//! - `reliability_tests`: The VRF-selected data-reliability follow-up and conflict detection
//! - `qos_tests`: QoS reports computed from replies and carried in the next request
//! - `transport_tests`: HTTP and WebSocket transports against a served mock provider
//! - `mock_infrastructure`: Reusable mock providers, session manager and fixtures
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! All providers run in-process; no external network is required.

#[cfg(test)]
mod dispatch_tests;


#[cfg(test)]
mod qos_tests;

#[cfg(test)]
mod transport_tests;
