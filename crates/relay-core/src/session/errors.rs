use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no providers paired for the current epoch")]
    NoPairing,

    #[error("all {providers} providers are excluded, blocked, or out of compute units")]
    ProvidersExhausted { providers: usize },

    #[error("epoch {requested} is not newer than current epoch {current}")]
    StaleEpoch { requested: u64, current: u64 },

    #[error("epoch mismatch: requested {requested}, current {current}")]
    EpochMismatch { requested: u64, current: u64 },

    #[error("reliability index {index} out of range for {providers} providers")]
    IndexOutOfRange { index: usize, providers: usize },

    #[error("reliability index selects the original provider")]
    IndexIsOriginalProvider,

    #[error("provider {0} is blocked")]
    ProviderBlocked(String),

    #[error("provider {0} has no free reliability session")]
    SessionBusy(String),

    #[error("provider {0} has no endpoints")]
    NoEndpoints(String),
}

impl SessionError {
    /// Returns `true` if a reliability check can still pick another provider.
    #[must_use]
    pub fn is_index_conflict(&self) -> bool {
        matches!(self, Self::IndexIsOriginalProvider)
    }
}
