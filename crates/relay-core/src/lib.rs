//! # Relay Core
//!
//! Consumer-side relay core: turns a client's raw chain request into a signed relay to a paired
//! provider and accepts the reply only after it authenticates.
//!
//! - **[`chainproxy`]**: Per-interface parsers (`jsonrpc`, `tendermintrpc`, `rest`) and the
//!   chain proxy factory.
//!
//! - **[`relay`]**: Request builder, reply authenticator and the two-phase dispatcher with its
//!   data-reliability follow-up.
//!
//! - **[`session`]**: Epoch-scoped provider sessions, compute-unit accounting and QoS scoring.
//!
//! - **[`sentry`]**: The consumer's view of the chain and provider population.
//!
//! - **[`sigs`]**: Digests and secp256k1 signatures over relays, replies and VRF payloads.
//!
//! - **[`transport`]**: HTTP and WebSocket transports to provider endpoints.
//!
//! - **[`metrics`]**: Prometheus metrics for relays, sessions and QoS.
//!
//! ## Relay Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────┐
//! │ ChainProxy  │ ─── Unknown API ──► ParseError
//! │ (parse_msg) │
//! └──────┬──────┘
//!        ▼
//! ┌────────────────┐
//! │ SessionManager │ ─── Exhausted ──► NoAvailableSession
//! │ (get_session)  │
//! └──────┬─────────┘
//!        ▼
//! ┌─────────────┐     ┌──────────────┐
//! │ Sign + Send │ ──► │ Verify Reply │ ─── Mismatch ──► Verification error
//! └─────────────┘     └──────┬───────┘
//!                            ▼
//!                     ┌──────────────┐
//!                     │  QoS Score   │
//!                     └──────┬───────┘
//!                            ▼
//!                  VRF ≤ threshold? ──► Follow-up to a second provider
//!                            │
//!                            ▼
//!                     Release sessions
//! ```

pub mod chainproxy;
pub mod config;
pub mod metrics;
pub mod relay;
pub mod sentry;
pub mod session;
pub mod sigs;
pub mod transport;
pub mod types;
