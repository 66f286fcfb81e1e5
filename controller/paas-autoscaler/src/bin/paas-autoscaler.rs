//! Autoscaler binary - runs the scaling loop until the process is stopped

use anyhow::Context;
use paas_autoscaler::aws::{self, CloudWatchElbMetrics, SqsQueueBacklog};
use paas_autoscaler::source::QueryBackend;
use paas_autoscaler::{
    CloudFoundryClient, Config, MetricBackends, Orchestrator, PrometheusClient, Scheduler,
    SystemClock, TracingEventSink,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse_config();

    // Initialize logging
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let catalog = match config.load_catalog() {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Refusing to start: {}", e);
            return Err(e.into());
        }
    };

    info!("Starting PaaS autoscaler");
    info!("  API endpoint: {}", config.cf_api_url);
    info!("  User: {}", config.cf_username);
    info!("  Org: {}", config.cf_org);
    info!("  Space: {}", config.cf_space);
    info!("  Interval: {}s", config.schedule_interval);
    info!("  Apps: {}", catalog.len());

    let platform = Arc::new(
        CloudFoundryClient::new(
            &config.cf_api_url,
            config.cf_username.clone(),
            config.cf_password.clone(),
            config.http_timeout(),
        )
        .context("Failed to create platform client")?,
    );

    let aws_config = aws::load_config(&config.aws_region).await;
    let query: Option<Arc<dyn QueryBackend>> = match &config.prometheus_url {
        Some(url) => Some(Arc::new(
            PrometheusClient::new(url, config.http_timeout())
                .context("Failed to create Prometheus client")?,
        )),
        None => None,
    };
    let backends = MetricBackends {
        queues: Arc::new(SqsQueueBacklog::new(
            &aws_config,
            config.sqs_queue_prefix.clone(),
        )),
        load_balancers: Arc::new(CloudWatchElbMetrics::new(&aws_config)),
        query,
    };

    let clock = Arc::new(SystemClock);
    let events = Arc::new(TracingEventSink);
    let scheduler = Scheduler::new(config.interval(), clock.clone())?;
    info!(jitter_ms = scheduler.jitter().as_millis() as u64, "Scheduler ready");

    let mut orchestrator = Orchestrator::new(
        catalog,
        config.namespace(),
        platform,
        backends,
        clock,
        events,
    );

    scheduler.run(&mut orchestrator).await;
    Ok(())
}
