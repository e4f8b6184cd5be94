/*
    scoreboard.rs - Relay ranking oracle

    RelayRanking is the seam the rest of the core uses: give it candidate
    relays, get them back best first. RelayScoreboard is the default
    implementation. Requests feed it through RelayFeedback as they run:

    - response time: subscribe accepted -> first message (event or EOSE)
    - failure: connect error, timeout, or an early close

    Score (lower is better) = mean of the recent response times plus a
    penalty proportional to the failure rate. Relays with no observations
    rank after every measured relay, keeping their input order.
*/

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::core_event::RelayUrl;

/// Orders relays best first
pub trait RelayRanking: Send + Sync {
    fn rank(&self, candidates: &[RelayUrl]) -> Vec<RelayUrl>;

    fn best(&self, candidates: &[RelayUrl]) -> Option<RelayUrl> {
        self.rank(candidates).into_iter().next()
    }
}

/// Quality signals reported by running requests
pub trait RelayFeedback: Send + Sync {
    fn record_response(&self, relay: &RelayUrl, elapsed: Duration);
    fn record_failure(&self, relay: &RelayUrl);
}

/// Response samples kept per relay
const MAX_SAMPLES: usize = 20;

/// Added to the score at a 100% failure rate
const FAILURE_PENALTY_MS: f64 = 5_000.0;

#[derive(Debug, Clone, Default)]
struct RelayStats {
    response_times: VecDeque<Duration>,
    successes: u32,
    failures: u32,
}

impl RelayStats {
    fn score(&self) -> Option<f64> {
        let attempts = self.successes + self.failures;
        if attempts == 0 {
            return None;
        }

        let mean_ms = if self.response_times.is_empty() {
            0.0
        } else {
            let total: Duration = self.response_times.iter().sum();
            total.as_secs_f64() * 1000.0 / self.response_times.len() as f64
        };
        let failure_rate = self.failures as f64 / attempts as f64;

        Some(mean_ms + failure_rate * FAILURE_PENALTY_MS)
    }
}

/// Snapshot of one relay's standing
#[derive(Debug, Clone, PartialEq)]
pub struct RelayScore {
    pub relay: RelayUrl,
    pub score: Option<f64>,
    pub successes: u32,
    pub failures: u32,
}

#[derive(Debug, Default)]
pub struct RelayScoreboard {
    stats: Mutex<HashMap<RelayUrl, RelayStats>>,
}

impl RelayScoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, relay: &RelayUrl) -> RelayScore {
        let stats = self.stats.lock().get(relay).cloned().unwrap_or_default();
        RelayScore {
            relay: relay.clone(),
            score: stats.score(),
            successes: stats.successes,
            failures: stats.failures,
        }
    }

    /// Forget everything learned about `relay`
    pub fn reset(&self, relay: &RelayUrl) {
        self.stats.lock().remove(relay);
    }
}

impl RelayFeedback for RelayScoreboard {
    fn record_response(&self, relay: &RelayUrl, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(relay.clone()).or_default();
        entry.successes += 1;
        entry.response_times.push_back(elapsed);
        if entry.response_times.len() > MAX_SAMPLES {
            entry.response_times.pop_front();
        }
    }

    fn record_failure(&self, relay: &RelayUrl) {
        self.stats.lock().entry(relay.clone()).or_default().failures += 1;
    }
}

impl RelayRanking for RelayScoreboard {
    fn rank(&self, candidates: &[RelayUrl]) -> Vec<RelayUrl> {
        let stats = self.stats.lock();
        let mut scored: Vec<(usize, Option<f64>, &RelayUrl)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, relay)| (idx, stats.get(relay).and_then(RelayStats::score), relay))
            .collect();

        scored.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => x.total_cmp(&y).then(a.0.cmp(&b.0)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.0.cmp(&b.0),
        });

        let mut ranked: Vec<RelayUrl> = Vec::with_capacity(scored.len());
        for (_, _, relay) in scored {
            if !ranked.contains(relay) {
                ranked.push(relay.clone());
            }
        }
        ranked
    }
}
