//! Network directory: what the consumer knows about the chain and its provider population.
//!
//! The dispatcher reads the directory at verification time to score a reply against the
//! block height the provider population agrees on.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Read-mostly view of the network a consumer relays to.
pub trait NetworkDirectory: Send + Sync {
    fn chain_id(&self) -> &str;

    /// Interface selector (`jsonrpc`, `tendermintrpc`, `rest`).
    fn api_interface(&self) -> &str;

    /// Expected block height and the number of providers reporting at least that height.
    fn expected_block_height(&self) -> (i64, usize);

    /// Size of the paired provider population.
    fn providers_count(&self) -> usize;

    /// Whether replies must carry a finalization signature bound to this consumer.
    fn compares_hashes(&self) -> bool;

    /// VRF threshold below which a data-reliability check is triggered. `u32::MAX` checks every
    /// eligible reply, `0` effectively disables checks.
    fn data_reliability_threshold(&self) -> u32;

    /// Records the latest block an authenticated reply reported.
    fn record_provider_block(&self, _provider: &str, _latest_block: i64) {}
}

/// Expected height together with how many providers have reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeightSnapshot {
    pub expected_block_height: i64,
    pub providers_with_height: usize,
}

/// Directory fed by provider replies.
///
/// The expected height is the median of the latest blocks authenticated replies reported, and
/// is republished as one atomic snapshot after every report.
pub struct Sentry {
    chain_id: String,
    api_interface: String,
    compares_hashes: bool,
    data_reliability_threshold: u32,
    providers_count: AtomicUsize,
    provider_blocks: DashMap<String, i64>,
    snapshot: ArcSwap<BlockHeightSnapshot>,
}

impl Sentry {
    pub fn new(
        chain_id: &str,
        api_interface: &str,
        compares_hashes: bool,
        data_reliability_threshold: u32,
    ) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            api_interface: api_interface.to_string(),
            compares_hashes,
            data_reliability_threshold,
            providers_count: AtomicUsize::new(0),
            provider_blocks: DashMap::new(),
            snapshot: ArcSwap::from_pointee(BlockHeightSnapshot::default()),
        }
    }

    /// Sets the provider population for a new pairing and forgets old block reports.
    pub fn set_providers(&self, providers: usize) {
        self.providers_count.store(providers, Ordering::Release);
        self.provider_blocks.clear();
        self.snapshot.store(Arc::new(BlockHeightSnapshot::default()));
    }

    /// Publishes an externally computed expected height.
    pub fn set_expected_block_height(&self, expected_block_height: i64, providers_with_height: usize) {
        self.snapshot.store(Arc::new(BlockHeightSnapshot {
            expected_block_height,
            providers_with_height,
        }));
    }

    #[must_use]
    pub fn snapshot(&self) -> BlockHeightSnapshot {
        **self.snapshot.load()
    }

    fn recompute(&self) {
        let mut blocks: Vec<i64> = self.provider_blocks.iter().map(|entry| *entry.value()).collect();
        if blocks.is_empty() {
            return;
        }
        blocks.sort_unstable();
        let expected = blocks[blocks.len() / 2];
        let providers_with_height = blocks.iter().filter(|block| **block >= expected).count();

        self.set_expected_block_height(expected, providers_with_height);
    }
}

impl NetworkDirectory for Sentry {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn api_interface(&self) -> &str {
        &self.api_interface
    }

    fn expected_block_height(&self) -> (i64, usize) {
        let snapshot = self.snapshot.load();
        (snapshot.expected_block_height, snapshot.providers_with_height)
    }

    fn providers_count(&self) -> usize {
        self.providers_count.load(Ordering::Acquire)
    }

    fn compares_hashes(&self) -> bool {
        self.compares_hashes
    }

    fn data_reliability_threshold(&self) -> u32 {
        self.data_reliability_threshold
    }

    fn record_provider_block(&self, provider: &str, latest_block: i64) {
        let advanced = match self.provider_blocks.get_mut(provider) {
            Some(mut block) if *block < latest_block => {
                *block = latest_block;
                true
            }
            Some(_) => false,
            None => {
                self.provider_blocks.insert(provider.to_string(), latest_block);
                true
            }
        };
        if advanced {
            self.recompute();
            tracing::trace!(provider = provider, latest_block = latest_block, "provider block recorded");
        }
    }
}
