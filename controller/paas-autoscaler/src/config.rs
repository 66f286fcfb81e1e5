//! Configuration for the autoscaler service

use crate::catalog::AppCatalog;
use crate::error::AutoscalerError;
use crate::platform::Namespace;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the autoscaler
#[derive(Debug, Clone, Parser)]
#[command(name = "paas-autoscaler")]
#[command(about = "Scales Cloud Foundry apps from queue, load-balancer and Prometheus demand")]
pub struct Config {
    /// Seconds between evaluation cycles
    #[arg(long, env)]
    pub schedule_interval: u64,

    /// Cloud Foundry API endpoint
    #[arg(long, env)]
    pub cf_api_url: String,

    /// Cloud Foundry user
    #[arg(long, env)]
    pub cf_username: String,

    /// Cloud Foundry password
    #[arg(long, env, hide_env_values = true)]
    pub cf_password: String,

    /// Organization the managed apps live in
    #[arg(long, env)]
    pub cf_org: String,

    /// Space the managed apps live in
    #[arg(long, env)]
    pub cf_space: String,

    /// Minimum instance count for apps that do not set their own
    #[arg(long, env)]
    pub cf_min_instance_count: Option<u32>,

    /// Prefix prepended to every queue name
    #[arg(long, env)]
    pub sqs_queue_prefix: String,

    /// AWS region of the queues and load balancers
    #[arg(long, env)]
    pub aws_region: String,

    /// Prometheus server root (required when any app uses an aggregation query)
    #[arg(long, env)]
    pub prometheus_url: Option<String>,

    /// YAML file listing the managed apps
    #[arg(long, env)]
    pub apps_file: PathBuf,

    /// HTTP timeout for platform and Prometheus calls, in seconds
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    pub fn namespace(&self) -> Namespace {
        Namespace {
            org: self.cf_org.clone(),
            space: self.cf_space.clone(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Load the app catalog and check it against this configuration
    pub fn load_catalog(&self) -> Result<AppCatalog, AutoscalerError> {
        self.validate()?;
        let catalog = AppCatalog::load(&self.apps_file, self.cf_min_instance_count)?;
        if catalog.needs_query_backend() && self.prometheus_url.is_none() {
            return Err(AutoscalerError::configuration(
                "PROMETHEUS_URL is required when an app uses an aggregation_query source",
            ));
        }
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), AutoscalerError> {
        if self.schedule_interval == 0 {
            return Err(AutoscalerError::configuration(
                "SCHEDULE_INTERVAL must be positive",
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(AutoscalerError::configuration(
                "HTTP_TIMEOUT_SECS must be positive",
            ));
        }
        for (name, url) in [
            ("CF_API_URL", Some(self.cf_api_url.as_str())),
            ("PROMETHEUS_URL", self.prometheus_url.as_deref()),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(AutoscalerError::configuration(format!(
                        "Invalid {} format: {}. Must start with http:// or https://",
                        name, url
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config(apps_file: PathBuf) -> Config {
        Config {
            schedule_interval: 60,
            cf_api_url: "https://api.cloud.example".to_string(),
            cf_username: "autoscaler".to_string(),
            cf_password: "secret".to_string(),
            cf_org: "govuk-notify".to_string(),
            cf_space: "test".to_string(),
            cf_min_instance_count: Some(1),
            sqs_queue_prefix: "test-".to_string(),
            aws_region: "eu-west-1".to_string(),
            prometheus_url: None,
            apps_file,
            http_timeout_secs: 30,
            log_json: false,
        }
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "paas-autoscaler",
            "--schedule-interval",
            "30",
            "--cf-api-url",
            "https://api.cloud.example",
            "--cf-username",
            "autoscaler",
            "--cf-password",
            "secret",
            "--cf-org",
            "govuk-notify",
            "--cf-space",
            "test",
            "--sqs-queue-prefix",
            "test-",
            "--aws-region",
            "eu-west-1",
            "--apps-file",
            "apps.yaml",
        ])
        .unwrap();

        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.namespace().to_string(), "govuk-notify/test");
        assert!(config.prometheus_url.is_none());
        assert!(!config.log_json);
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let mut config = test_config(PathBuf::from("apps.yaml"));
        config.schedule_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_scheme_is_checked() {
        let mut config = test_config(PathBuf::from("apps.yaml"));
        config.cf_api_url = "api.cloud.example".to_string();
        assert!(config.validate().is_err());

        config.cf_api_url = "https://api.cloud.example".to_string();
        config.prometheus_url = Some("prometheus:9090".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_aggregation_apps_need_prometheus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.yaml");
        fs::write(
            &path,
            r#"
apps:
  - name: notify-admin
    unit_capacity: 1500
    max_instances: 2
    source:
      kind: aggregation_query
      metric: requests
      labels: { app: notify-admin }
"#,
        )
        .unwrap();

        let mut config = test_config(path);
        assert!(config.load_catalog().is_err());

        config.prometheus_url = Some("https://prometheus.example".to_string());
        assert_eq!(config.load_catalog().unwrap().len(), 1);
    }
}
