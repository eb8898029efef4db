//! Per-session quality-of-service scoring.
//!
//! Each answered relay folds into three scores in `[0.0, 1.0]`:
//!
//! - **availability**: share of sent relays that were answered, scaled so that losing
//!   [`AVAILABILITY_PERCENTAGE`] or more of relays drives the score to zero
//! - **latency**: expected latency for the relay's compute units divided by the observed
//!   latency, capped at 1, then taken at the [`PERCENTILE_TO_CALCULATE_LATENCY`] percentile of
//!   the session's history
//! - **sync**: share of relays where the provider was at or ahead of the expected block height,
//!   counted only when enough of the provider population agreed on that height
//!
//! The resulting [`QosReport`] is embedded in the session's next relay request.

use crate::types::QosReport;
use std::time::Duration;

/// Fraction of unanswered relays at which availability bottoms out.
pub const AVAILABILITY_PERCENTAGE: f64 = 0.1;

/// Percentile of the latency score history reported for the session.
pub const PERCENTILE_TO_CALCULATE_LATENCY: f64 = 0.9;

/// Fraction of the provider population that must agree on the expected block height before
/// sync is scored.
pub const MIN_PROVIDERS_FOR_SYNC: f64 = 0.6;

/// Baseline expected latency of any relay.
pub const LATENCY_THRESHOLD_STATIC: Duration = Duration::from_secs(1);

/// Additional expected latency per compute unit.
pub const LATENCY_THRESHOLD_SLOPE: Duration = Duration::from_millis(1);

/// Latency scores retained per session.
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Relay counters and score history for one session.
#[derive(Debug, Clone, Default)]
pub struct QosInfo {
    pub last_qos_report: Option<QosReport>,
    pub total_relays: u64,
    pub answered_relays: u64,
    pub consecutive_timeouts: u64,
    sync_score_sum: u64,
    total_sync_score: u64,
    /// Kept sorted ascending.
    latency_scores: Vec<f64>,
}

impl QosInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a relay as sent. Called before the relay leaves the consumer.
    pub fn record_sent(&mut self) {
        self.total_relays = self.total_relays.saturating_add(1);
    }

    /// Counts a relay that hit its deadline.
    pub fn record_timeout(&mut self) {
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
    }

    /// Number of latency samples currently retained.
    pub fn latency_samples(&self) -> usize {
        self.latency_scores.len()
    }

    /// Folds an authenticated reply into the session's scores and stores the new report.
    ///
    /// `block_height_diff` is the expected block height minus the provider's latest block.
    /// `num_of_providers` is how many providers reported the expected height and
    /// `servicers_to_count` is the size of the provider population.
    ///
    /// Never fails: inputs that would produce a non-finite score yield `0.0` for that score.
    pub fn calculate_qos(
        &mut self,
        compute_units: u64,
        latency: Duration,
        block_height_diff: i64,
        num_of_providers: usize,
        servicers_to_count: usize,
    ) -> QosReport {
        self.answered_relays = self.answered_relays.saturating_add(1);
        self.total_relays = self.total_relays.max(self.answered_relays);
        self.consecutive_timeouts = 0;

        let availability = availability_score(self.total_relays, self.answered_relays);

        self.push_latency_score(latency_score(compute_units, latency));
        let latency = percentile(&self.latency_scores, PERCENTILE_TO_CALCULATE_LATENCY);

        let sync = if should_calculate_sync(num_of_providers, servicers_to_count) {
            if block_height_diff <= 0 {
                self.sync_score_sum = self.sync_score_sum.saturating_add(1);
            }
            self.total_sync_score = self.total_sync_score.saturating_add(1);
            self.sync_score_sum as f64 / self.total_sync_score as f64
        } else {
            1.0
        };

        let report = QosReport {
            latency: sanitize(latency),
            availability: sanitize(availability),
            sync: sanitize(sync),
        };
        self.last_qos_report = Some(report);
        report
    }

    fn push_latency_score(&mut self, score: f64) {
        let score = sanitize(score);
        let position = self.latency_scores.partition_point(|existing| *existing < score);
        self.latency_scores.insert(position, score);
        if self.latency_scores.len() > MAX_LATENCY_SAMPLES {
            // drop from the middle so both tails of the distribution survive
            self.latency_scores.remove(self.latency_scores.len() / 2);
        }
    }
}

fn availability_score(total_relays: u64, answered_relays: u64) -> f64 {
    if total_relays == 0 {
        return 1.0;
    }
    let downtime = (total_relays - answered_relays.min(total_relays)) as f64 / total_relays as f64;
    ((AVAILABILITY_PERCENTAGE - downtime) / AVAILABILITY_PERCENTAGE).max(0.0)
}

/// Expected latency over observed latency, capped at 1.
pub fn latency_score(compute_units: u64, latency: Duration) -> f64 {
    let expected = LATENCY_THRESHOLD_STATIC.as_secs_f64()
        + LATENCY_THRESHOLD_SLOPE.as_secs_f64() * compute_units as f64;
    let observed = latency.as_secs_f64();
    if observed <= 0.0 {
        return 1.0;
    }
    (expected / observed).min(1.0)
}

fn should_calculate_sync(num_of_providers: usize, servicers_to_count: usize) -> bool {
    num_of_providers as f64 > (servicers_to_count as f64 * MIN_PROVIDERS_FOR_SYNC).ceil()
}

fn percentile(sorted: &[f64], rank: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * rank) as usize).min(sorted.len() - 1);
    sorted[index]
}

fn sanitize(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
