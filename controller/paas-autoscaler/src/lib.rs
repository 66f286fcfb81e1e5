//! PaaS Autoscaler - scales Cloud Foundry apps from external demand signals
//!
//! On every tick the orchestrator snapshots the apps in one org/space, samples
//! each configured app's demand (queue backlog, load-balancer traffic or a
//! Prometheus aggregation), turns it into a bounded instance count and applies
//! the change. One failing app or backend never blocks the others.

pub mod aws;
pub mod catalog;
pub mod clock;
pub mod cloudfoundry;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod platform;
pub mod policy;
pub mod prometheus;
pub mod scheduler;
pub mod session;
pub mod source;

pub use catalog::{AppCatalog, AppSpec};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cloudfoundry::CloudFoundryClient;
pub use config::Config;
pub use error::{AutoscalerError, PlatformError};
pub use events::{CycleEvent, EventSink, RecordingEventSink, TracingEventSink};
pub use orchestrator::{CycleReport, Orchestrator};
pub use platform::{Namespace, PlatformApp, PlatformClient, Session};
pub use prometheus::PrometheusClient;
pub use scheduler::{Scheduler, Tick};
pub use session::{SessionManager, SessionState, LOGIN_COOLDOWN};
pub use source::{DemandSample, LabelSet, MetricBackends, MetricSource};
