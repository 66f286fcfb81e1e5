//! Static catalog of apps the autoscaler manages
//!
//! Loaded once from YAML at startup and validated; an invalid catalog stops
//! the process before the first cycle.

use crate::error::AutoscalerError;
use crate::source::MetricSource;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One managed app
#[derive(Debug, Clone, PartialEq)]
pub struct AppSpec {
    pub name: String,
    pub source: MetricSource,
    /// Demand one instance is expected to absorb per window
    pub unit_capacity: f64,
    pub min_instances: u32,
    pub max_instances: u32,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    apps: Vec<AppEntry>,
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    name: String,
    source: MetricSource,
    unit_capacity: f64,
    min_instances: Option<u32>,
    max_instances: u32,
}

/// Apps in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppCatalog {
    apps: Vec<AppSpec>,
}

impl AppCatalog {
    pub fn new(apps: Vec<AppSpec>) -> Result<Self, AutoscalerError> {
        let catalog = Self { apps };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse a YAML catalog; `default_min` fills in entries without `min_instances`
    pub fn from_yaml(yaml: &str, default_min: Option<u32>) -> Result<Self, AutoscalerError> {
        let file: CatalogFile = serde_yaml::from_str(yaml).map_err(|e| {
            AutoscalerError::configuration(format!("failed to parse app catalog: {}", e))
        })?;

        let apps = file
            .apps
            .into_iter()
            .map(|entry| {
                let min_instances = entry.min_instances.or(default_min).ok_or_else(|| {
                    AutoscalerError::configuration(format!(
                        "{}: min_instances not set and no default minimum configured",
                        entry.name
                    ))
                })?;
                Ok(AppSpec {
                    name: entry.name,
                    source: entry.source,
                    unit_capacity: entry.unit_capacity,
                    min_instances,
                    max_instances: entry.max_instances,
                })
            })
            .collect::<Result<Vec<_>, AutoscalerError>>()?;

        Self::new(apps)
    }

    pub fn load(path: &Path, default_min: Option<u32>) -> Result<Self, AutoscalerError> {
        debug!("Loading app catalog from {}", path.display());
        let yaml = fs::read_to_string(path).map_err(|e| {
            AutoscalerError::configuration(format!(
                "failed to read app catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&yaml, default_min)
    }

    pub fn apps(&self) -> &[AppSpec] {
        &self.apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Whether any app reads from the aggregation query backend
    pub fn needs_query_backend(&self) -> bool {
        self.apps
            .iter()
            .any(|app| matches!(app.source, MetricSource::AggregationQuery { .. }))
    }

    fn validate(&self) -> Result<(), AutoscalerError> {
        let mut seen = HashSet::new();

        for app in &self.apps {
            if app.name.trim().is_empty() {
                return Err(AutoscalerError::configuration("app name must not be empty"));
            }
            if !seen.insert(app.name.as_str()) {
                return Err(AutoscalerError::configuration(format!(
                    "{}: declared more than once",
                    app.name
                )));
            }
            if !(app.unit_capacity.is_finite() && app.unit_capacity > 0.0) {
                return Err(AutoscalerError::configuration(format!(
                    "{}: unit_capacity must be positive, got {}",
                    app.name, app.unit_capacity
                )));
            }
            if app.min_instances > app.max_instances {
                return Err(AutoscalerError::configuration(format!(
                    "{}: min_instances {} exceeds max_instances {}",
                    app.name, app.min_instances, app.max_instances
                )));
            }
            validate_source(&app.name, &app.source)?;
        }

        Ok(())
    }
}

fn validate_source(app: &str, source: &MetricSource) -> Result<(), AutoscalerError> {
    match source {
        MetricSource::QueueDepth { queues } => {
            if queues.is_empty() {
                return Err(AutoscalerError::configuration(format!(
                    "{}: queue_depth source needs at least one queue",
                    app
                )));
            }
        }
        MetricSource::LoadBalancerTraffic {
            load_balancer,
            window_secs,
            ..
        } => {
            if load_balancer.is_empty() || *window_secs == 0 {
                return Err(AutoscalerError::configuration(format!(
                    "{}: load_balancer_traffic source needs a load balancer and a non-zero window",
                    app
                )));
            }
        }
        MetricSource::AggregationQuery {
            metric,
            labels,
            window_secs,
        } => {
            if metric.is_empty() || *window_secs == 0 {
                return Err(AutoscalerError::configuration(format!(
                    "{}: aggregation_query source needs a metric and a non-zero window",
                    app
                )));
            }
            if labels.iter().any(|(key, _)| key.is_empty()) {
                return Err(AutoscalerError::configuration(format!(
                    "{}: label names must not be empty",
                    app
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
apps:
  - name: notify-delivery-worker-database
    unit_capacity: 2000
    max_instances: 20
    source:
      kind: queue_depth
      queues: [db-sms, db-email, db-letter]
  - name: notify-api
    unit_capacity: 1500
    min_instances: 2
    max_instances: 20
    source:
      kind: load_balancer_traffic
      load_balancer: notify-paas-proxy
      surge_queue: true
  - name: notify-admin
    unit_capacity: 1500
    max_instances: 2
    source:
      kind: aggregation_query
      metric: requests
      window_secs: 600
      labels:
        app: notify-admin
        exported_space: test
        organisation: govuk-notify
"#;

    #[test]
    fn test_parse_catalog_in_declaration_order() {
        let catalog = AppCatalog::from_yaml(CATALOG, Some(1)).unwrap();

        let names: Vec<&str> = catalog.apps().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["notify-delivery-worker-database", "notify-api", "notify-admin"]
        );
        assert_eq!(catalog.apps()[0].min_instances, 1);
        assert_eq!(catalog.apps()[1].min_instances, 2);
        assert!(catalog.needs_query_backend());

        match &catalog.apps()[2].source {
            MetricSource::AggregationQuery {
                labels,
                window_secs,
                ..
            } => {
                assert_eq!(*window_secs, 600);
                assert_eq!(
                    labels.render(),
                    "app=\"notify-admin\",exported_space=\"test\",organisation=\"govuk-notify\""
                );
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_missing_minimum_is_rejected() {
        let result = AppCatalog::from_yaml(CATALOG, None);
        assert!(matches!(result, Err(AutoscalerError::Configuration { .. })));
    }

    #[test]
    fn test_min_above_max_is_rejected() {
        let yaml = r#"
apps:
  - name: worker
    unit_capacity: 100
    min_instances: 5
    max_instances: 2
    source: { kind: queue_depth, queues: [jobs] }
"#;
        let err = AppCatalog::from_yaml(yaml, None).unwrap_err();
        assert!(err.to_string().contains("exceeds max_instances"));
    }

    #[test]
    fn test_non_positive_capacity_is_rejected() {
        let yaml = r#"
apps:
  - name: worker
    unit_capacity: 0
    max_instances: 2
    source: { kind: queue_depth, queues: [jobs] }
"#;
        let err = AppCatalog::from_yaml(yaml, Some(1)).unwrap_err();
        assert!(err.to_string().contains("unit_capacity must be positive"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let yaml = r#"
apps:
  - name: worker
    unit_capacity: 10
    max_instances: 2
    source: { kind: queue_depth, queues: [jobs] }
  - name: worker
    unit_capacity: 10
    max_instances: 2
    source: { kind: queue_depth, queues: [other] }
"#;
        assert!(AppCatalog::from_yaml(yaml, Some(1)).is_err());
    }

    #[test]
    fn test_unknown_source_kind_is_rejected() {
        let yaml = r#"
apps:
  - name: worker
    unit_capacity: 10
    max_instances: 2
    source: { kind: forecast }
"#;
        assert!(AppCatalog::from_yaml(yaml, Some(1)).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.yaml");
        fs::write(&path, CATALOG).unwrap();

        let catalog = AppCatalog::load(&path, Some(1)).unwrap();
        assert_eq!(catalog.len(), 3);

        assert!(AppCatalog::load(&dir.path().join("missing.yaml"), Some(1)).is_err());
    }

    #[test]
    fn test_example_catalog_is_valid() {
        let catalog =
            AppCatalog::from_yaml(include_str!("../apps.example.yaml"), Some(1)).unwrap();
        assert_eq!(catalog.len(), 6);
        assert!(catalog.needs_query_backend());
    }
}
