//! Consumer sessions with paired providers.
//!
//! A session is leased exclusively to one relay at a time through a [`SessionLease`] and
//! handed back to its [`SessionManager`] once the relay is done. [`ConsumerSessionManager`]
//! is the in-process implementation used by the portal.

mod consumer;
mod errors;
mod manager;
pub mod qos;

pub use consumer::{
    ConsumerSessionsWithProvider, Endpoint, SingleConsumerSession, DATA_RELIABILITY_SESSION_ID,
};
pub use errors::SessionError;
pub use manager::{
    ConsumerSessionManager, SessionLease, SessionManager, SessionOutcome,
    MAX_CONSECUTIVE_FAILURES,
};
pub use qos::QosInfo;
