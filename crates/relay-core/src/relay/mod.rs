//! Relay dispatch: building signed relays, authenticating replies and the data-reliability
//! follow-up.

mod builder;
mod context;
mod dispatcher;
mod errors;
pub mod reliability;
pub mod verify;

pub use builder::RelayRequestBuilder;
pub use context::{CancelHandle, RelayContext};
pub use dispatcher::{send_relay, ReliabilityStatus, RelayResponse};
pub use errors::{RelayError, VerificationError};
pub use verify::verify_relay_reply;

pub use crate::chainproxy::DEFAULT_TIMEOUT;
