//! Registry of named circuit breakers built from one configuration.
//!
//! Construct a [`ResilienceRegistry`] once at startup and pass it (or the
//! breakers and calls it hands out) to the code that talks to each
//! dependency. Breakers are created lazily on first use, keyed by name, and
//! shared from then on.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ResilienceRegistry::new(ResilienceConfig::from_file("resilience.yaml")?)?;
//! let inventory = registry.call("inventory");
//! let stock = inventory.execute(|| client.stock(sku), &registry.retry_policy()).await?;
//! ```

use breakwater_core::{
    Classify, CircuitStats, ConfigError, ResilienceConfig, RetryOverrides, StateChange,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::fetch::{ResilientFetch, Transport};
use crate::resilience::{CircuitBreaker, ResilientCall, RetryPolicy, StateObserver};

/// Named breakers plus the retry defaults they are used with.
pub struct ResilienceRegistry {
    config: ResilienceConfig,
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
    observer: Option<StateObserver>,
}

impl ResilienceRegistry {
    /// Validate `config` and create an empty registry.
    pub fn new(config: ResilienceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            breakers: RwLock::new(BTreeMap::new()),
            observer: None,
        })
    }

    /// Observer attached to every breaker created from now on.
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: Fn(&str, StateChange) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// The breaker named `name`, created on first request with the shared
    /// circuit settings plus any per-breaker overrides.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(breaker = name, "Registering circuit breaker");
            let settings = self.config.circuit_for(name);
            Arc::new(
                CircuitBreaker::from_valid(name.to_string(), settings)
                    .with_shared_observer(self.observer.clone()),
            )
        });
        Arc::clone(breaker)
    }

    /// Breaker-plus-retry call for `name`.
    pub fn call(&self, name: &str) -> ResilientCall {
        ResilientCall::new(self.breaker(name))
    }

    /// Retry policy from the configured defaults.
    pub fn retry_policy<E>(&self) -> RetryPolicy<E>
    where
        E: Classify + fmt::Display + 'static,
    {
        RetryPolicy::new(self.config.retry.clone())
    }

    /// Retry policy from the configured defaults with `overrides` applied.
    pub fn retry_policy_with<E>(&self, overrides: &RetryOverrides) -> Result<RetryPolicy<E>, ConfigError>
    where
        E: Classify + fmt::Display + 'static,
    {
        Ok(RetryPolicy::new(overrides.apply_to(&self.config.retry)?))
    }

    /// Resilient fetch through the breaker named `name`.
    pub fn fetch(&self, name: &str, transport: Arc<dyn Transport>) -> ResilientFetch {
        ResilientFetch::new(transport, self.call(name), self.config.retry.clone())
    }

    /// Names of every breaker created so far.
    pub fn names(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }

    /// Stats for every breaker, ordered by name.
    pub fn stats(&self) -> Vec<CircuitStats> {
        self.breakers.read().values().map(|b| b.stats()).collect()
    }

    /// Force every breaker closed.
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.force_reset();
        }
    }
}

impl fmt::Debug for ResilienceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}
