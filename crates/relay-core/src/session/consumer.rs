use super::QosInfo;
use crate::transport::RelayTransport;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Session id reserved for data-reliability relays.
pub const DATA_RELIABILITY_SESSION_ID: u64 = 0;

/// A provider endpoint and the transport connected to it.
#[derive(Clone)]
pub struct Endpoint {
    pub url: String,
    pub client: Arc<dyn RelayTransport>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, client: Arc<dyn RelayTransport>) -> Self {
        Self { url: url.into(), client }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("url", &self.url).finish_non_exhaustive()
    }
}

/// State of one relay session with a provider. Only touched through the lock that leases it.
#[derive(Debug, Clone)]
pub struct SingleConsumerSession {
    pub session_id: u64,
    pub cu_sum: u64,
    pub latest_relay_cu: u64,
    pub relay_num: u64,
    pub latest_block: i64,
    pub consecutive_errors: u32,
    pub qos_info: QosInfo,
}

impl SingleConsumerSession {
    #[must_use]
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            cu_sum: 0,
            latest_relay_cu: 0,
            relay_num: 0,
            latest_block: 0,
            consecutive_errors: 0,
            qos_info: QosInfo::new(),
        }
    }

    /// Charges the session for one relay of `compute_units`.
    pub fn prepare_relay(&mut self, compute_units: u64) {
        self.cu_sum = self.cu_sum.saturating_add(compute_units);
        self.latest_relay_cu = compute_units;
        self.relay_num = self.relay_num.saturating_add(1);
    }

    /// Reverts the charge of the latest relay.
    pub fn refund_latest_relay(&mut self) {
        self.cu_sum = self.cu_sum.saturating_sub(self.latest_relay_cu);
        self.latest_relay_cu = 0;
    }
}

/// Sessions and compute-unit budget for one paired provider.
pub struct ConsumerSessionsWithProvider {
    pub public_address: String,
    pub endpoints: Vec<Endpoint>,
    pub max_compute_units: u64,
    pub pairing_epoch: u64,
    used_compute_units: AtomicU64,
    next_session_id: AtomicU64,
    sessions: parking_lot::Mutex<Vec<Arc<Mutex<SingleConsumerSession>>>>,
    reliability_session: Arc<Mutex<SingleConsumerSession>>,
}

impl ConsumerSessionsWithProvider {
    pub fn new(
        public_address: impl Into<String>,
        endpoints: Vec<Endpoint>,
        max_compute_units: u64,
        pairing_epoch: u64,
    ) -> Self {
        Self {
            public_address: public_address.into(),
            endpoints,
            max_compute_units,
            pairing_epoch,
            used_compute_units: AtomicU64::new(0),
            next_session_id: AtomicU64::new(DATA_RELIABILITY_SESSION_ID + 1),
            sessions: parking_lot::Mutex::new(Vec::new()),
            reliability_session: Arc::new(Mutex::new(SingleConsumerSession::new(
                DATA_RELIABILITY_SESSION_ID,
            ))),
        }
    }

    #[must_use]
    pub fn used_compute_units(&self) -> u64 {
        self.used_compute_units.load(Ordering::Acquire)
    }

    /// Number of sessions opened with this provider so far.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub(crate) fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }

    /// Reserves `compute_units` against the provider's budget. Fails without side effects if
    /// the budget would be exceeded.
    pub(crate) fn try_reserve_compute_units(&self, compute_units: u64) -> bool {
        self.used_compute_units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(compute_units).filter(|total| *total <= self.max_compute_units)
            })
            .is_ok()
    }

    pub(crate) fn release_compute_units(&self, compute_units: u64) {
        let _ = self.used_compute_units.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
            Some(used.saturating_sub(compute_units))
        });
    }

    /// Locks an idle session, opening a new one if every existing session is in use.
    pub(crate) fn acquire_session(&self) -> Option<OwnedMutexGuard<SingleConsumerSession>> {
        let mut sessions = self.sessions.lock();
        if let Some(guard) =
            sessions.iter().find_map(|session| Arc::clone(session).try_lock_owned().ok())
        {
            return Some(guard);
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Mutex::new(SingleConsumerSession::new(session_id)));
        let guard = Arc::clone(&session).try_lock_owned().ok()?;
        sessions.push(session);
        Some(guard)
    }

    pub(crate) fn acquire_reliability_session(&self) -> Option<OwnedMutexGuard<SingleConsumerSession>> {
        Arc::clone(&self.reliability_session).try_lock_owned().ok()
    }
}

impl fmt::Debug for ConsumerSessionsWithProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSessionsWithProvider")
            .field("public_address", &self.public_address)
            .field("endpoints", &self.endpoints)
            .field("max_compute_units", &self.max_compute_units)
            .field("used_compute_units", &self.used_compute_units())
            .field("pairing_epoch", &self.pairing_epoch)
            .finish_non_exhaustive()
    }
}
