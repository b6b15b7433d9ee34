//! End-to-end request path: route, then call through the chosen backend's
//! resilience chain, falling back to the other backend when it is healthy.

use std::future::Future;
use std::sync::Arc;

use switchyard_core::{
    ResilienceError, RoutingDecision, RoutingMetrics, ServiceTarget, SwitchyardConfig,
    ValidationError,
};

use crate::backends::BackendHandle;
use crate::resilience::ResilienceChain;
use crate::router::TrafficRouter;

/// A successful call together with the routing decision behind it.
#[derive(Debug, Clone)]
pub struct Dispatched<T> {
    pub value: T,
    pub decision: RoutingDecision,
}

/// Router plus one resilience chain per backend.
#[derive(Debug)]
pub struct Dispatcher {
    router: Arc<TrafficRouter>,
    primary_chain: ResilienceChain,
    secondary_chain: ResilienceChain,
}

impl Dispatcher {
    pub fn new(
        router: Arc<TrafficRouter>,
        primary_chain: ResilienceChain,
        secondary_chain: ResilienceChain,
    ) -> Self {
        Self {
            router,
            primary_chain,
            secondary_chain,
        }
    }

    /// Build the router and both chains from one configuration.
    ///
    /// Each chain gets its own breaker, named after its backend.
    pub fn from_config(
        config: &SwitchyardConfig,
        primary: Arc<BackendHandle>,
        secondary: Arc<BackendHandle>,
        metrics: Arc<RoutingMetrics>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let primary_chain = ResilienceChain::from_config(primary.name(), config);
        let secondary_chain = ResilienceChain::from_config(secondary.name(), config);
        let router = TrafficRouter::new(&config.router, primary, secondary, metrics)?;

        Ok(Self::new(Arc::new(router), primary_chain, secondary_chain))
    }

    pub fn router(&self) -> &Arc<TrafficRouter> {
        &self.router
    }

    pub fn chain(&self, target: ServiceTarget) -> &ResilienceChain {
        match target {
            ServiceTarget::Primary => &self.primary_chain,
            ServiceTarget::Secondary => &self.secondary_chain,
        }
    }

    /// Route `request_id` and run `call` against the chosen backend.
    ///
    /// `call` receives the backend to talk to. It runs through that backend's
    /// chain; when the decision says the other backend is available, a single
    /// unprotected `call(other)` is the fallback.
    pub async fn dispatch<T, E, F, Fut>(
        &self,
        request_id: &str,
        operation_type: &str,
        call: F,
    ) -> Result<Dispatched<T>, ResilienceError>
    where
        T: Send,
        E: Into<ResilienceError> + Send,
        F: Fn(ServiceTarget) -> Fut + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.dispatch_until(request_id, operation_type, call, std::future::pending())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), abandoned when `cancel` resolves.
    pub async fn dispatch_until<T, E, F, Fut, C>(
        &self,
        request_id: &str,
        operation_type: &str,
        call: F,
        cancel: C,
    ) -> Result<Dispatched<T>, ResilienceError>
    where
        T: Send,
        E: Into<ResilienceError> + Send,
        F: Fn(ServiceTarget) -> Fut + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        C: Future<Output = ()>,
    {
        let decision = self.router.decide(request_id, operation_type);
        let chosen = decision.service;
        let call = &call;

        let fallback = decision.fallback_available.then(|| {
            let other = chosen.other();
            move || call(other)
        });

        let value = self
            .chain(chosen)
            .execute_with_protection_until(move || call(chosen), fallback, cancel)
            .await
            .inspect_err(|e| {
                tracing::warn!(request_id, operation_type, service = %chosen, error = %e, "Dispatch failed");
            })?;

        self.router.record_success();
        Ok(Dispatched { value, decision })
    }
}
