//! AWS-backed metric collaborators: SQS queue backlog and classic ELB statistics

use crate::source::{LoadBalancerMetrics, MetricPoint, QueueBacklog, TimeWindow};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Datapoint, Dimension, StandardUnit, Statistic};
use aws_sdk_sqs::types::QueueAttributeName;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

const ELB_NAMESPACE: &str = "AWS/ELB";
const ELB_PERIOD_SECS: i32 = 60;

/// Load the shared AWS configuration for `region`
pub async fn load_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// Reads `ApproximateNumberOfMessages` of prefixed SQS queues
pub struct SqsQueueBacklog {
    client: aws_sdk_sqs::Client,
    queue_prefix: String,
}

impl SqsQueueBacklog {
    pub fn new(config: &aws_config::SdkConfig, queue_prefix: String) -> Self {
        Self {
            client: aws_sdk_sqs::Client::new(config),
            queue_prefix,
        }
    }

    fn queue_name(&self, queue: &str) -> String {
        format!("{}{}", self.queue_prefix, queue)
    }
}

#[async_trait]
impl QueueBacklog for SqsQueueBacklog {
    async fn approximate_message_count(&self, queue: &str) -> Result<u64> {
        let name = self.queue_name(queue);

        let url = self
            .client
            .get_queue_url()
            .queue_name(&name)
            .send()
            .await
            .with_context(|| format!("Failed to resolve URL of queue {}", name))?
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No URL returned for queue {}", name))?;

        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .with_context(|| format!("Failed to read attributes of queue {}", name))?;

        let count = output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .ok_or_else(|| anyhow!("Queue {} did not report a message count", name))?
            .parse::<u64>()
            .with_context(|| format!("Invalid message count for queue {}", name))?;

        debug!(queue = %name, messages = count, "Read queue backlog");
        Ok(count)
    }
}

/// Reads per-minute statistics of a classic load balancer from CloudWatch
pub struct CloudWatchElbMetrics {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchElbMetrics {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudwatch::Client::new(config),
        }
    }

    async fn statistics(
        &self,
        load_balancer: &str,
        metric: &str,
        statistic: Statistic,
        unit: Option<StandardUnit>,
        window: &TimeWindow,
    ) -> Result<Vec<Datapoint>> {
        let output = self
            .client
            .get_metric_statistics()
            .namespace(ELB_NAMESPACE)
            .metric_name(metric)
            .dimensions(elb_dimension(load_balancer))
            .start_time(AwsDateTime::from_secs(window.start.timestamp()))
            .end_time(AwsDateTime::from_secs(window.end.timestamp()))
            .period(ELB_PERIOD_SECS)
            .statistics(statistic)
            .set_unit(unit)
            .send()
            .await
            .with_context(|| format!("Failed to read {} for {}", metric, load_balancer))?;

        Ok(output.datapoints().to_vec())
    }
}

fn elb_dimension(load_balancer: &str) -> Dimension {
    Dimension::builder()
        .name("LoadBalancerName")
        .value(load_balancer)
        .build()
}

fn to_points(
    datapoints: &[Datapoint],
    value: impl Fn(&Datapoint) -> Option<f64>,
) -> Vec<MetricPoint> {
    datapoints
        .iter()
        .filter_map(|dp| {
            let timestamp = dp.timestamp()?;
            let timestamp: DateTime<Utc> = Utc.timestamp_opt(timestamp.secs(), 0).single()?;
            Some(MetricPoint {
                timestamp,
                value: value(dp)?,
            })
        })
        .collect()
}

#[async_trait]
impl LoadBalancerMetrics for CloudWatchElbMetrics {
    async fn request_counts(
        &self,
        load_balancer: &str,
        window: &TimeWindow,
    ) -> Result<Vec<MetricPoint>> {
        let datapoints = self
            .statistics(
                load_balancer,
                "RequestCount",
                Statistic::Sum,
                Some(StandardUnit::Count),
                window,
            )
            .await?;
        Ok(to_points(&datapoints, |dp| dp.sum()))
    }

    async fn surge_queue_lengths(
        &self,
        load_balancer: &str,
        window: &TimeWindow,
    ) -> Result<Vec<MetricPoint>> {
        let datapoints = self
            .statistics(
                load_balancer,
                "SurgeQueueLength",
                Statistic::Maximum,
                None,
                window,
            )
            .await?;
        Ok(to_points(&datapoints, |dp| dp.maximum()))
    }
}
