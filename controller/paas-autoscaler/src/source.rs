//! Metric sources - turn an app's demand signal into a single scalar
//!
//! Each variant reads from one external backend. An empty result is zero
//! demand; transport or backend failures are returned to the orchestrator,
//! which skips only the affected app.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Trailing range used by windowed sources unless an app overrides it
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Resolution of aggregation queries
pub const QUERY_STEP_SECS: u64 = 15;

/// Range of the `increase()` inside aggregation queries
pub const INCREASE_RANGE: &str = "60s";

/// One demand measurement for one evaluation window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandSample {
    pub value: f64,
    /// Longest surge queue seen in the window; zero when not checked
    pub surge_queue_length: f64,
}

impl DemandSample {
    pub fn new(value: f64) -> Self {
        Self {
            value: value.max(0.0),
            surge_queue_length: 0.0,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0)
    }

    /// Requests are queuing in front of the app; scale to the configured maximum
    pub fn surging(&self) -> bool {
        self.surge_queue_length > 0.0
    }
}

/// Wall-clock range a sample is taken over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `secs` seconds leading up to `end`
    pub fn trailing(end: DateTime<Utc>, secs: u64) -> Self {
        Self {
            start: end - chrono::Duration::seconds(secs as i64),
            end,
        }
    }
}

/// A single timestamped datapoint from the load-balancer backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Approximate backlog of a message queue
#[async_trait]
pub trait QueueBacklog: Send + Sync {
    async fn approximate_message_count(&self, queue: &str) -> Result<u64>;
}

/// Per-minute load-balancer statistics
#[async_trait]
pub trait LoadBalancerMetrics: Send + Sync {
    /// Per-minute sums of requests served over `window`
    async fn request_counts(
        &self,
        load_balancer: &str,
        window: &TimeWindow,
    ) -> Result<Vec<MetricPoint>>;

    /// Per-minute maxima of the surge queue length over `window`
    async fn surge_queue_lengths(
        &self,
        load_balancer: &str,
        window: &TimeWindow,
    ) -> Result<Vec<MetricPoint>>;
}

/// Time-series backend answering range queries
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Every value of every series returned for `query`
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<f64>>;
}

/// The backends each source variant reads from
#[derive(Clone)]
pub struct MetricBackends {
    pub queues: Arc<dyn QueueBacklog>,
    pub load_balancers: Arc<dyn LoadBalancerMetrics>,
    pub query: Option<Arc<dyn QueryBackend>>,
}

/// Exact-match label set; declaration order is preserved when rendered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `key="value"` pairs joined by commas
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<'de> Deserialize<'de> for LabelSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LabelSetVisitor;

        impl<'de> Visitor<'de> for LabelSetVisitor {
            type Value = LabelSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of label names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<LabelSet, A::Error> {
                let mut labels = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    labels.push((key, value));
                }
                Ok(LabelSet(labels))
            }
        }

        deserializer.deserialize_map(LabelSetVisitor)
    }
}

/// A `query_range` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub query: String,
    pub start: i64,
    pub end: i64,
    pub step: u64,
}

impl RangeQuery {
    /// Unencoded `query=...&start=...&end=...&step=...` form, as logged
    pub fn to_query_string(&self) -> String {
        format!(
            "query={}&start={}&end={}&step={}",
            self.query, self.start, self.end, self.step
        )
    }
}

/// Where an app's demand comes from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSource {
    /// Largest backlog across a set of queues
    QueueDepth { queues: Vec<String> },

    /// Busiest minute of load-balancer traffic in the trailing window
    LoadBalancerTraffic {
        load_balancer: String,
        #[serde(default = "default_window_secs")]
        window_secs: u64,
        #[serde(default)]
        surge_queue: bool,
    },

    /// Sum of a templated `increase()` aggregation
    AggregationQuery {
        metric: String,
        labels: LabelSet,
        #[serde(default = "default_window_secs")]
        window_secs: u64,
    },
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

impl MetricSource {
    pub fn kind(&self) -> &'static str {
        match self {
            MetricSource::QueueDepth { .. } => "queue_depth",
            MetricSource::LoadBalancerTraffic { .. } => "load_balancer_traffic",
            MetricSource::AggregationQuery { .. } => "aggregation_query",
        }
    }

    /// Sample demand as of `now`
    pub async fn produce_demand(
        &self,
        backends: &MetricBackends,
        now: DateTime<Utc>,
    ) -> Result<DemandSample> {
        match self {
            MetricSource::QueueDepth { queues } => {
                highest_backlog(backends.queues.as_ref(), queues).await
            }
            MetricSource::LoadBalancerTraffic {
                load_balancer,
                window_secs,
                surge_queue,
            } => {
                let window = TimeWindow::trailing(now, *window_secs);
                busiest_minute(
                    backends.load_balancers.as_ref(),
                    load_balancer,
                    &window,
                    *surge_queue,
                )
                .await
            }
            MetricSource::AggregationQuery {
                metric,
                labels,
                window_secs,
            } => {
                let backend = backends
                    .query
                    .as_ref()
                    .ok_or_else(|| anyhow!("no query backend configured"))?;
                let query = aggregation_query(metric, labels, now, *window_secs);
                summed_series(backend.as_ref(), &query).await
            }
        }
    }
}

/// `sum(increase(<metric>{<labels>}[60s]))` over the trailing window
pub fn aggregation_query(
    metric: &str,
    labels: &LabelSet,
    now: DateTime<Utc>,
    window_secs: u64,
) -> RangeQuery {
    let end = now.timestamp();
    RangeQuery {
        query: format!(
            "sum(increase({}{{{}}}[{}]))",
            metric,
            labels.render(),
            INCREASE_RANGE
        ),
        start: end - window_secs as i64,
        end,
        step: QUERY_STEP_SECS,
    }
}

async fn highest_backlog(backend: &dyn QueueBacklog, queues: &[String]) -> Result<DemandSample> {
    let mut highest = 0;
    for queue in queues {
        let count = backend
            .approximate_message_count(queue)
            .await
            .with_context(|| format!("Failed to read backlog of queue {}", queue))?;
        debug!(queue = %queue, messages = count, "Queue backlog");
        highest = highest.max(count);
    }
    Ok(DemandSample::new(highest as f64))
}

async fn busiest_minute(
    backend: &dyn LoadBalancerMetrics,
    load_balancer: &str,
    window: &TimeWindow,
    check_surge_queue: bool,
) -> Result<DemandSample> {
    let mut points = backend
        .request_counts(load_balancer, window)
        .await
        .with_context(|| format!("Failed to read request counts for {}", load_balancer))?;
    points.sort_by_key(|p| p.timestamp);

    let counts: Vec<f64> = points.iter().map(|p| p.value).collect();
    debug!(load_balancer = %load_balancer, request_counts = ?counts, "Request counts");

    let highest = counts.iter().copied().fold(0.0, f64::max);
    let mut sample = DemandSample::new(highest);

    if check_surge_queue {
        let surge_queue_length = backend
            .surge_queue_lengths(load_balancer, window)
            .await
            .with_context(|| format!("Failed to read surge queue for {}", load_balancer))?
            .iter()
            .map(|p| p.value)
            .fold(0.0, f64::max);
        debug!(
            load_balancer = %load_balancer,
            surge_queue_length = surge_queue_length,
            "Surge queue"
        );
        sample.surge_queue_length = surge_queue_length;
    }

    Ok(sample)
}

async fn summed_series(backend: &dyn QueryBackend, query: &RangeQuery) -> Result<DemandSample> {
    debug!(query = %query.to_query_string(), "Running aggregation query");
    let values = backend
        .query_range(query)
        .await
        .with_context(|| format!("Aggregation query failed: {}", query.query))?;
    Ok(DemandSample::new(values.iter().sum()))
}
