use std::sync::{LazyLock, RwLock};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

pub static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_prefix("weft_cni")));

#[derive(Clone)]
pub struct RouteMetrics {
    pub operations: Family<RouteLabels, Counter>,
    pub reconcile_duration: Histogram,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub op: String,
    pub status: String,
}

impl Default for RouteMetrics {
    fn default() -> Self {
        Self {
            operations: Family::<RouteLabels, Counter>::default(),
            reconcile_duration: Histogram::new(
                [0.01, 0.1, 0.25, 0.5, 1.0, 5.0, 15.0, 60.0].into_iter(),
            ),
        }
    }
}

impl RouteMetrics {
    /// Register route metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "route_reconcile_duration",
            "route reconcile pass duration",
            Unit::Seconds,
            self.reconcile_duration.clone(),
        );
        r.register(
            "route_operations",
            "Number of host route operations",
            self.operations.clone(),
        );
        self
    }

    /// Registers with the global registry.
    pub fn registered() -> Self {
        match REGISTRY.write() {
            Ok(mut registry) => Self::default().register(&mut registry),
            Err(poisoned) => Self::default().register(&mut poisoned.into_inner()),
        }
    }

    pub fn count<T, E>(&self, op: &str, result: &Result<T, E>) {
        let status = if result.is_ok() { "success" } else { "failure" };
        self.operations
            .get_or_create(&RouteLabels {
                op: op.into(),
                status: status.into(),
            })
            .inc();
    }

    pub fn measure_reconcile(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.observe(duration);
    }
}
