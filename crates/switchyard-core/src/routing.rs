//! Routing vocabulary: targets, strategies, decisions, and traffic metrics.
//!
//! Everything here is synchronous and cheap; the router in
//! `switchyard-runtime` combines it with live backend health.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which of the two backends serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTarget {
    Primary,
    Secondary,
}

impl ServiceTarget {
    /// The other backend.
    pub fn other(self) -> Self {
        match self {
            ServiceTarget::Primary => ServiceTarget::Secondary,
            ServiceTarget::Secondary => ServiceTarget::Primary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceTarget::Primary => "primary",
            ServiceTarget::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the router picks a backend when both are healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Send everything to primary
    #[default]
    PrimaryPreferred,

    /// Send everything to secondary
    SecondaryPreferred,

    /// Split by request hash using the traffic percentage
    PercentageSplit,
}

impl RoutingStrategy {
    /// Backend this strategy leans on; the other is its fallback.
    pub fn preferred(self) -> ServiceTarget {
        match self {
            RoutingStrategy::SecondaryPreferred => ServiceTarget::Secondary,
            RoutingStrategy::PrimaryPreferred | RoutingStrategy::PercentageSplit => {
                ServiceTarget::Primary
            }
        }
    }
}

/// Why a decision was made.
///
/// Serialized as the snake_case string used in logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    /// Preferred backend was primary and is down; secondary took over
    PrimaryUnavailableFallback,

    /// Secondary was preferred or selected and is down; primary took over
    SecondaryUnavailableFallback,

    /// Neither backend is healthy
    NoHealthyBackend,

    /// Hash split while gradual rollout is enabled
    GradualRolloutSelected,

    /// Hash split from the percentage-split strategy
    PercentageSplitSelected,

    /// Plain strategy preference
    StrategyDefault,
}

impl RoutingReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingReason::PrimaryUnavailableFallback => "primary_unavailable_fallback",
            RoutingReason::SecondaryUnavailableFallback => "secondary_unavailable_fallback",
            RoutingReason::NoHealthyBackend => "no_healthy_backend",
            RoutingReason::GradualRolloutSelected => "gradual_rollout_selected",
            RoutingReason::PercentageSplitSelected => "percentage_split_selected",
            RoutingReason::StrategyDefault => "strategy_default",
        }
    }

    /// Whether the decision moved traffic away from an unhealthy backend.
    pub fn is_health_fallback(self) -> bool {
        matches!(
            self,
            RoutingReason::PrimaryUnavailableFallback | RoutingReason::SecondaryUnavailableFallback
        )
    }
}

impl fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of routing a single request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Backend chosen
    pub service: ServiceTarget,

    /// Why it was chosen
    pub reason: RoutingReason,

    /// Confidence in the choice (0.0 - 1.0)
    pub confidence: f64,

    /// Whether the other backend could still serve this request
    pub fallback_available: bool,

    /// Request this decision belongs to
    pub request_id: String,
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Maps request ids onto `0..100`, stable for a given seed.
///
/// The hash is FNV-1a over the seed and the id, followed by a 64-bit mixing
/// finalizer. The algorithm is fixed, so a configured seed maps every id to
/// the same bucket across restarts and toolchain upgrades. Routers draw a
/// fresh seed at construction unless one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSelector {
    seed: u64,
}

impl RequestSelector {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Bucket in `0..100` for a request id.
    pub fn bucket(&self, request_id: &str) -> u8 {
        (self.stable_hash(request_id) % 100) as u8
    }

    /// Seeded hash of a request id.
    pub fn stable_hash(&self, request_id: &str) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in self.seed.to_le_bytes().iter().chain(request_id.as_bytes()) {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }

        // FNV leaves the low bits weakly mixed and buckets are taken mod 100
        hash ^= hash >> 30;
        hash = hash.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        hash ^= hash >> 27;
        hash = hash.wrapping_mul(0x94d0_49bb_1331_11eb);
        hash ^ (hash >> 31)
    }
}

/// Traffic counters shared by every request a router handles.
///
/// Each field is updated atomically on its own; readers may observe counters
/// from slightly different instants, which only affects reporting.
#[derive(Debug, Default)]
pub struct RoutingMetrics {
    total_requests: AtomicU64,
    primary_requests: AtomicU64,
    secondary_requests: AtomicU64,
    success_count: AtomicU64,
    fallback_count: AtomicU64,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a routing decision.
    pub fn record_decision(&self, decision: &RoutingDecision) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match decision.service {
            ServiceTarget::Primary => self.primary_requests.fetch_add(1, Ordering::Relaxed),
            ServiceTarget::Secondary => self.secondary_requests.fetch_add(1, Ordering::Relaxed),
        };
        if decision.reason.is_health_fallback() {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request that completed successfully.
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn primary_requests(&self) -> u64 {
        self.primary_requests.load(Ordering::Relaxed)
    }

    pub fn secondary_requests(&self) -> u64 {
        self.secondary_requests.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Share of requests sent to primary, 0.0 with no traffic.
    pub fn primary_percentage(&self) -> f64 {
        ratio(self.primary_requests(), self.total_requests())
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.success_count(), self.total_requests())
    }

    pub fn fallback_rate(&self) -> f64 {
        ratio(self.fallback_count(), self.total_requests())
    }

    /// Point-in-time copy for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests();
        let primary = self.primary_requests();
        let success = self.success_count();
        let fallback = self.fallback_count();
        MetricsSnapshot {
            total_requests: total,
            primary_requests: primary,
            secondary_requests: self.secondary_requests(),
            success_count: success,
            fallback_count: fallback,
            primary_percentage: ratio(primary, total),
            success_rate: ratio(success, total),
            fallback_rate: ratio(fallback, total),
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Read-only view of [`RoutingMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub primary_requests: u64,
    pub secondary_requests: u64,
    pub success_count: u64,
    pub fallback_count: u64,
    pub primary_percentage: f64,
    pub success_rate: f64,
    pub fallback_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decision(service: ServiceTarget, reason: RoutingReason) -> RoutingDecision {
        RoutingDecision {
            service,
            reason,
            confidence: 1.0,
            fallback_available: true,
            request_id: "req".to_string(),
        }
    }

    #[test]
    fn test_empty_metrics_ratios_are_zero() {
        let metrics = RoutingMetrics::new();
        assert_eq!(metrics.primary_percentage(), 0.0);
        assert_eq!(metrics.success_rate(), 0.0);
        assert_eq!(metrics.fallback_rate(), 0.0);
    }

    #[test]
    fn test_metrics_counts() {
        let metrics = RoutingMetrics::new();
        metrics.record_decision(&decision(ServiceTarget::Primary, RoutingReason::StrategyDefault));
        metrics.record_decision(&decision(
            ServiceTarget::Secondary,
            RoutingReason::PrimaryUnavailableFallback,
        ));
        metrics.record_decision(&decision(ServiceTarget::Primary, RoutingReason::NoHealthyBackend));
        metrics.record_success();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.primary_requests, 2);
        assert_eq!(snapshot.secondary_requests, 1);
        assert_eq!(snapshot.fallback_count, 1);
        assert!((snapshot.primary_percentage - 2.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.success_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(RoutingReason::NoHealthyBackend.to_string(), "no_healthy_backend");
        let json = serde_json::to_string(&RoutingReason::GradualRolloutSelected).unwrap();
        assert_eq!(json, "\"gradual_rollout_selected\"");
    }

    #[test]
    fn test_strategy_preferred() {
        assert_eq!(RoutingStrategy::PrimaryPreferred.preferred(), ServiceTarget::Primary);
        assert_eq!(RoutingStrategy::SecondaryPreferred.preferred(), ServiceTarget::Secondary);
        assert_eq!(RoutingStrategy::PercentageSplit.preferred(), ServiceTarget::Primary);
    }

    #[test]
    fn test_selector_output_is_pinned() {
        // changing these values reshuffles every pinned rollout
        assert_eq!(RequestSelector::new(0).stable_hash(""), 9_313_164_154_874_788_883);
        assert_eq!(
            RequestSelector::new(42).stable_hash("request-1"),
            13_229_937_947_641_753_043
        );
        assert_eq!(RequestSelector::new(42).bucket("request-1"), 43);
        assert_eq!(RequestSelector::new(7).bucket("checkout-17"), 90);
    }

    #[test]
    fn test_selector_depends_on_seed() {
        let a = RequestSelector::new(1);
        let b = RequestSelector::new(2);
        let differing = (0..100)
            .filter(|i| {
                let id = format!("req-{i}");
                a.bucket(&id) != b.bucket(&id)
            })
            .count();
        assert!(differing > 50);
    }

    proptest! {
        #[test]
        fn prop_selector_stable_and_in_range(seed in any::<u64>(), id in ".{0,64}") {
            let selector = RequestSelector::new(seed);
            let bucket = selector.bucket(&id);
            prop_assert!(bucket < 100);
            prop_assert_eq!(bucket, selector.bucket(&id));
        }

        #[test]
        fn prop_ratios_are_fractions(primary in 0u64..500, secondary in 0u64..500) {
            let metrics = RoutingMetrics::new();
            for _ in 0..primary {
                metrics.record_decision(&decision(ServiceTarget::Primary, RoutingReason::StrategyDefault));
            }
            for _ in 0..secondary {
                metrics.record_decision(&decision(ServiceTarget::Secondary, RoutingReason::StrategyDefault));
            }
            let pct = metrics.primary_percentage();
            prop_assert!((0.0..=1.0).contains(&pct));
            prop_assert_eq!(metrics.total_requests(), primary + secondary);
        }
    }
}
