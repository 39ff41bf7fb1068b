use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<ResultLabels, Counter>,
    durations: Family<KindLabels, Histogram>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ResultLabels {
    kind: &'static str,
    result: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ResultLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciliations by resource kind and result",
            reconciles.clone(),
        );

        let durations = Family::<KindLabels, Histogram>::new_with_constructor(|| {
            // Reconciliations may wait on several DNS lookups, each bounded
            // to 10s.
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0])
        });
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of reconciliation latency by resource kind",
            Unit::Seconds,
            durations.clone(),
        );

        Self {
            reconciles,
            durations,
        }
    }

    pub fn observe(&self, kind: &'static str, result: &'static str, start: time::Instant) {
        self.durations
            .get_or_create(&KindLabels { kind })
            .observe(start.elapsed().as_secs_f64());
        self.reconciles
            .get_or_create(&ResultLabels { kind, result })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciles_are_counted_by_result() {
        let mut reg = Registry::default();
        let metrics = ControllerMetrics::register(reg.sub_registry_with_prefix("acl_controller"));
        let start = time::Instant::now();
        metrics.observe("ACL", "ready", start);
        metrics.observe("ACL", "ready", start);
        metrics.observe("ACL", "error", start);

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &reg).unwrap();
        assert!(
            text.contains(r#"acl_controller_reconciles_total{kind="ACL",result="ready"} 2"#),
            "{text}"
        );
        assert!(
            text.contains(r#"acl_controller_reconciles_total{kind="ACL",result="error"} 1"#),
            "{text}"
        );
        assert!(
            text.contains(r#"acl_controller_reconcile_duration_seconds_count{kind="ACL"} 3"#),
            "{text}"
        );
    }
}
