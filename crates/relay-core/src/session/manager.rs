use super::{ConsumerSessionsWithProvider, Endpoint, SessionError, SingleConsumerSession};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Consecutive failed relays after which a provider is blocked for the rest of the epoch.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Exclusive lease on a session. Returned to the manager exactly once.
pub struct SessionLease {
    pub session: OwnedMutexGuard<SingleConsumerSession>,
    pub epoch: u64,
    pub provider_address: String,
    /// JSON-encoded addresses of providers this consumer found unresponsive.
    pub reported_providers: Vec<u8>,
    pub endpoint: Endpoint,
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session.session_id)
            .field("epoch", &self.epoch)
            .field("provider_address", &self.provider_address)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// How the relay on a leased session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    /// The provider failed the relay: transport error, timeout, or a reply that did not verify.
    Failure,
    /// The relay never reached a verdict, e.g. the caller went away or signing failed.
    Aborted,
}

impl SessionOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
        }
    }
}

/// Leases sessions to the dispatcher and takes them back.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Leases a session with a provider not in `excluded` that can afford `compute_units`.
    async fn get_session(
        &self,
        compute_units: u64,
        excluded: &HashSet<String>,
    ) -> Result<SessionLease, SessionError>;

    /// Returns a primary session.
    fn on_session_done(&self, lease: SessionLease, latest_block: i64, outcome: SessionOutcome);

    /// Installs the provider pairing for `epoch`.
    async fn update_all_providers(
        &self,
        epoch: u64,
        providers: Vec<ConsumerSessionsWithProvider>,
    ) -> Result<(), SessionError>;

    /// Leases the data-reliability session of the provider at `index` in the pairing.
    async fn get_data_reliability_session(
        &self,
        original_provider: &str,
        index: usize,
        epoch: u64,
    ) -> Result<SessionLease, SessionError>;

    /// Returns a data-reliability session.
    fn on_data_reliability_session_done(
        &self,
        lease: SessionLease,
        latest_block: i64,
        outcome: SessionOutcome,
    );
}

#[derive(Default)]
struct Pairing {
    epoch: Option<u64>,
    providers: Vec<Arc<ConsumerSessionsWithProvider>>,
    by_address: HashMap<String, usize>,
    blocked: HashSet<String>,
}

impl Pairing {
    fn provider(&self, address: &str) -> Option<&Arc<ConsumerSessionsWithProvider>> {
        self.by_address.get(address).and_then(|index| self.providers.get(*index))
    }

    fn reported_providers(&self) -> Vec<u8> {
        if self.blocked.is_empty() {
            return Vec::new();
        }
        let mut blocked: Vec<&String> = self.blocked.iter().collect();
        blocked.sort();
        serde_json::to_vec(&blocked).unwrap_or_default()
    }
}

/// Epoch-scoped session manager over the paired providers.
///
/// Providers are picked round-robin. A provider is blocked for the rest of the epoch after
/// [`MAX_CONSECUTIVE_FAILURES`] failed relays on one session, and blocked providers are reported
/// in later requests.
#[derive(Default)]
pub struct ConsumerSessionManager {
    pairing: RwLock<Pairing>,
    next_provider: AtomicUsize,
}

impl ConsumerSessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_epoch(&self) -> Option<u64> {
        self.pairing.read().epoch
    }

    #[must_use]
    pub fn providers_count(&self) -> usize {
        self.pairing.read().providers.len()
    }

    #[must_use]
    pub fn is_blocked(&self, provider: &str) -> bool {
        self.pairing.read().blocked.contains(provider)
    }

    #[must_use]
    pub fn used_compute_units(&self, provider: &str) -> Option<u64> {
        self.pairing.read().provider(provider).map(|p| p.used_compute_units())
    }

    fn release(&self, mut lease: SessionLease, latest_block: i64, outcome: SessionOutcome) {
        let mut pairing = self.pairing.write();
        if pairing.epoch != Some(lease.epoch) {
            debug!(
                provider = %lease.provider_address,
                epoch = lease.epoch,
                "session returned after epoch change"
            );
            return;
        }
        let Some(provider) = pairing.provider(&lease.provider_address).cloned() else {
            return;
        };

        let session = &mut *lease.session;
        match outcome {
            SessionOutcome::Success => {
                session.consecutive_errors = 0;
                session.latest_block = session.latest_block.max(latest_block);
            }
            SessionOutcome::Failure => {
                provider.release_compute_units(session.latest_relay_cu);
                session.refund_latest_relay();
                session.consecutive_errors = session.consecutive_errors.saturating_add(1);
                if session.consecutive_errors >= MAX_CONSECUTIVE_FAILURES &&
                    pairing.blocked.insert(lease.provider_address.clone())
                {
                    warn!(
                        provider = %lease.provider_address,
                        session_id = session.session_id,
                        consecutive_errors = session.consecutive_errors,
                        "blocking provider after consecutive failures"
                    );
                }
            }
            SessionOutcome::Aborted => {
                provider.release_compute_units(session.latest_relay_cu);
                session.refund_latest_relay();
            }
        }
        crate::metrics::record_session_released(outcome.as_str());
    }
}

#[async_trait]
impl SessionManager for ConsumerSessionManager {
    async fn get_session(
        &self,
        compute_units: u64,
        excluded: &HashSet<String>,
    ) -> Result<SessionLease, SessionError> {
        let pairing = self.pairing.read();
        let epoch = pairing.epoch.ok_or(SessionError::NoPairing)?;
        let count = pairing.providers.len();
        if count == 0 {
            return Err(SessionError::NoPairing);
        }

        let start = self.next_provider.fetch_add(1, Ordering::Relaxed);
        for offset in 0..count {
            let provider = &pairing.providers[(start + offset) % count];
            if excluded.contains(&provider.public_address) ||
                pairing.blocked.contains(&provider.public_address)
            {
                continue;
            }
            let Some(endpoint) = provider.endpoint().cloned() else {
                continue;
            };
            if !provider.try_reserve_compute_units(compute_units) {
                debug!(provider = %provider.public_address, "provider out of compute units");
                continue;
            }
            let Some(mut session) = provider.acquire_session() else {
                provider.release_compute_units(compute_units);
                continue;
            };

            session.prepare_relay(compute_units);
            debug!(
                provider = %provider.public_address,
                session_id = session.session_id,
                epoch = epoch,
                "session leased"
            );
            return Ok(SessionLease {
                session,
                epoch,
                provider_address: provider.public_address.clone(),
                reported_providers: pairing.reported_providers(),
                endpoint,
            });
        }

        Err(SessionError::ProvidersExhausted { providers: count })
    }

    fn on_session_done(&self, lease: SessionLease, latest_block: i64, outcome: SessionOutcome) {
        self.release(lease, latest_block, outcome);
    }

    async fn update_all_providers(
        &self,
        epoch: u64,
        providers: Vec<ConsumerSessionsWithProvider>,
    ) -> Result<(), SessionError> {
        let mut pairing = self.pairing.write();
        if let Some(current) = pairing.epoch {
            if epoch <= current {
                return Err(SessionError::StaleEpoch { requested: epoch, current });
            }
        }

        let providers: Vec<_> = providers.into_iter().map(Arc::new).collect();
        let by_address = providers
            .iter()
            .enumerate()
            .map(|(index, provider)| (provider.public_address.clone(), index))
            .collect();

        info!(epoch = epoch, providers = providers.len(), "provider pairing updated");
        *pairing = Pairing { epoch: Some(epoch), providers, by_address, blocked: HashSet::new() };
        Ok(())
    }

    async fn get_data_reliability_session(
        &self,
        original_provider: &str,
        index: usize,
        epoch: u64,
    ) -> Result<SessionLease, SessionError> {
        let pairing = self.pairing.read();
        let current = pairing.epoch.ok_or(SessionError::NoPairing)?;
        if current != epoch {
            return Err(SessionError::EpochMismatch { requested: epoch, current });
        }

        let provider = pairing.providers.get(index).ok_or(SessionError::IndexOutOfRange {
            index,
            providers: pairing.providers.len(),
        })?;
        if provider.public_address == original_provider {
            return Err(SessionError::IndexIsOriginalProvider);
        }
        if pairing.blocked.contains(&provider.public_address) {
            return Err(SessionError::ProviderBlocked(provider.public_address.clone()));
        }
        let endpoint = provider
            .endpoint()
            .cloned()
            .ok_or_else(|| SessionError::NoEndpoints(provider.public_address.clone()))?;
        let mut session = provider
            .acquire_reliability_session()
            .ok_or_else(|| SessionError::SessionBusy(provider.public_address.clone()))?;

        session.latest_relay_cu = 0;
        session.relay_num = session.relay_num.saturating_add(1);
        Ok(SessionLease {
            session,
            epoch,
            provider_address: provider.public_address.clone(),
            reported_providers: Vec::new(),
            endpoint,
        })
    }

    fn on_data_reliability_session_done(
        &self,
        lease: SessionLease,
        latest_block: i64,
        outcome: SessionOutcome,
    ) {
        self.release(lease, latest_block, outcome);
    }
}
