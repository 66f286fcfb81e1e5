//! Prometheus `query_range` client

use crate::source::{QueryBackend, RangeQuery};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

pub struct PrometheusClient {
    endpoint: String,
    client: reqwest::Client,
}

impl PrometheusClient {
    /// `base_url` is the server root; requests go to `<base_url>/api/v1/query_range`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: format!("{}/api/v1/query_range", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl QueryBackend for PrometheusClient {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<f64>> {
        debug!(endpoint = %self.endpoint, query = %query.query, "Querying Prometheus");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("query", query.query.clone()),
                ("start", query.start.to_string()),
                ("end", query.end.to_string()),
                ("step", query.step.to_string()),
            ])
            .send()
            .await
            .context("Prometheus request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            bail!("Prometheus returned error status {}: {}", status, body);
        }

        let body: QueryResponse = response
            .json()
            .await
            .context("Invalid Prometheus response")?;
        if body.status != "success" {
            bail!(
                "Prometheus query failed: {}",
                body.error.unwrap_or_else(|| body.status.clone())
            );
        }

        body.data
            .map(|data| data.result)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|series| series.values)
            .map(|(_, value)| {
                value
                    .parse::<f64>()
                    .with_context(|| format!("Invalid sample value {:?}", value))
            })
            .collect()
    }
}
