use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

pub const TSURU_APP_NAME: &str = "tsuru.io/app-name";
pub const TSURU_APP_POOL: &str = "tsuru.io/app-pool";
pub const RPAAS_INSTANCE_NAME: &str = "rpaas.extensions.tsuru.io/instance-name";
pub const RPAAS_SERVICE_NAME: &str = "rpaas.extensions.tsuru.io/service-name";

/// Namespaces are expected to carry their own name under this label.
pub const NAMESPACE_NAME: &str = "name";

pub fn tsuru_app(app: &str) -> Map {
    Some((TSURU_APP_NAME.to_string(), app.to_string()))
        .into_iter()
        .collect()
}

pub fn tsuru_app_pool(pool: &str) -> Map {
    Some((TSURU_APP_POOL.to_string(), pool.to_string()))
        .into_iter()
        .collect()
}

pub fn rpaas_instance(service: &str, instance: &str) -> Map {
    [
        (RPAAS_INSTANCE_NAME.to_string(), instance.to_string()),
        (RPAAS_SERVICE_NAME.to_string(), service.to_string()),
    ]
    .into_iter()
    .collect()
}

pub fn namespace(ns: &str) -> Map {
    Some((NAMESPACE_NAME.to_string(), ns.to_string()))
        .into_iter()
        .collect()
}

/// A selector built only from `matchLabels`.
pub fn selector(labels: Map) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels),
        match_expressions: None,
    }
}

/// The `matchLabels` of a selector, treating an absent map as empty.
pub fn match_labels(selector: Option<&LabelSelector>) -> Map {
    selector
        .and_then(|s| s.match_labels.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn rpaas_instances_select_by_service_and_instance() {
        assert_eq!(
            rpaas_instance("rpaasv2", "edge"),
            btreemap! {
                "rpaas.extensions.tsuru.io/instance-name".to_string() => "edge".to_string(),
                "rpaas.extensions.tsuru.io/service-name".to_string() => "rpaasv2".to_string(),
            }
        );
    }

    #[test]
    fn absent_selectors_have_no_labels() {
        assert!(match_labels(None).is_empty());
        assert!(match_labels(Some(&LabelSelector::default())).is_empty());
        assert_eq!(
            match_labels(Some(&selector(tsuru_app("web")))),
            btreemap! { "tsuru.io/app-name".to_string() => "web".to_string() }
        );
    }
}
