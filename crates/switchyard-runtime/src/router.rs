//! Per-request backend selection.
//!
//! Decisions read only cached backend health, so routing never waits on a
//! network round trip. Order of precedence:
//!
//! 1. Preferred backend down, other up → other (health fallback)
//! 2. Both down → primary with confidence 0.0
//! 3. Hash split when gradual rollout is on (or the strategy is a split)
//! 4. Otherwise the strategy's preferred backend

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use switchyard_core::{
    validate_percentage, OsRandom, RandomSource, RequestSelector, RouterConfig, RoutingDecision,
    RoutingMetrics, RoutingReason, RoutingStrategy, ServiceTarget, ValidationError,
};

use crate::backends::BackendHandle;

/// Routes requests between a primary and a secondary backend.
#[derive(Debug)]
pub struct TrafficRouter {
    strategy: RoutingStrategy,
    gradual_rollout_enabled: bool,
    /// f64 bits of the primary traffic percentage
    primary_percentage: AtomicU64,
    selector: RequestSelector,
    primary: Arc<BackendHandle>,
    secondary: Arc<BackendHandle>,
    metrics: Arc<RoutingMetrics>,
}

impl TrafficRouter {
    /// Create a router recording into `metrics`.
    ///
    /// Without a configured `hash_seed` the selector seed comes from the OS
    /// generator, so splits are stable for this instance only.
    pub fn new(
        config: &RouterConfig,
        primary: Arc<BackendHandle>,
        secondary: Arc<BackendHandle>,
        metrics: Arc<RoutingMetrics>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;

        let seed = config.hash_seed.unwrap_or_else(|| {
            let mut bytes = [0u8; 8];
            OsRandom.fill_bytes(&mut bytes);
            u64::from_le_bytes(bytes)
        });

        Ok(Self {
            strategy: config.strategy,
            gradual_rollout_enabled: config.gradual_rollout_enabled,
            primary_percentage: AtomicU64::new(config.primary_traffic_percentage.to_bits()),
            selector: RequestSelector::new(seed),
            primary,
            secondary,
            metrics,
        })
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    pub fn handle(&self, target: ServiceTarget) -> &Arc<BackendHandle> {
        match target {
            ServiceTarget::Primary => &self.primary,
            ServiceTarget::Secondary => &self.secondary,
        }
    }

    pub fn traffic_percentage(&self) -> f64 {
        f64::from_bits(self.primary_percentage.load(Ordering::Acquire))
    }

    /// Change the share of split traffic sent to primary.
    pub fn set_traffic_percentage(&self, percentage: f64) -> Result<(), ValidationError> {
        let percentage = validate_percentage(percentage)?;
        let previous = f64::from_bits(
            self.primary_percentage
                .swap(percentage.to_bits(), Ordering::AcqRel),
        );
        tracing::info!(from = previous, to = percentage, "Primary traffic percentage changed");
        Ok(())
    }

    /// Record that a routed request completed successfully.
    pub fn record_success(&self) {
        self.metrics.record_success();
    }

    /// Choose a backend for `request_id`. Never fails.
    pub fn decide(&self, request_id: &str, operation_type: &str) -> RoutingDecision {
        let decision = self.choose(request_id);

        if decision.reason == RoutingReason::NoHealthyBackend {
            tracing::warn!(request_id, operation_type, "No healthy backend available");
        }
        tracing::debug!(
            request_id,
            operation_type,
            service = %decision.service,
            reason = %decision.reason,
            confidence = decision.confidence,
            fallback_available = decision.fallback_available,
            "Routing decision"
        );

        self.metrics.record_decision(&decision);
        decision
    }

    fn choose(&self, request_id: &str) -> RoutingDecision {
        let healthy = |target: ServiceTarget| self.handle(target).is_healthy();
        let preferred = self.strategy.preferred();

        let (service, reason, confidence) = match (healthy(preferred), healthy(preferred.other())) {
            (false, true) => (preferred.other(), unavailable_reason(preferred), 1.0),
            (false, false) => (ServiceTarget::Primary, RoutingReason::NoHealthyBackend, 0.0),
            (true, other_healthy) => match self.split(request_id) {
                Some((selected, _, _)) if selected != preferred && !other_healthy => {
                    (preferred, unavailable_reason(selected), 1.0)
                }
                Some(split) => split,
                None => (preferred, RoutingReason::StrategyDefault, 1.0),
            },
        };

        RoutingDecision {
            service,
            reason,
            confidence,
            fallback_available: healthy(service.other()),
            request_id: request_id.to_string(),
        }
    }

    /// Hash split, if this router splits traffic at all.
    fn split(&self, request_id: &str) -> Option<(ServiceTarget, RoutingReason, f64)> {
        let reason = if self.gradual_rollout_enabled {
            RoutingReason::GradualRolloutSelected
        } else if self.strategy == RoutingStrategy::PercentageSplit {
            RoutingReason::PercentageSplitSelected
        } else {
            return None;
        };

        let percentage = self.traffic_percentage();
        let bucket = f64::from(self.selector.bucket(request_id));
        if bucket < percentage {
            Some((ServiceTarget::Primary, reason, percentage / 100.0))
        } else {
            Some((ServiceTarget::Secondary, reason, 1.0 - percentage / 100.0))
        }
    }
}

fn unavailable_reason(down: ServiceTarget) -> RoutingReason {
    match down {
        ServiceTarget::Primary => RoutingReason::PrimaryUnavailableFallback,
        ServiceTarget::Secondary => RoutingReason::SecondaryUnavailableFallback,
    }
}
