//! One evaluation cycle over every configured app
//!
//! A cycle snapshots the namespace, samples demand for each app in catalog
//! order, and scales the ones whose desired count differs. Failures for one
//! app are reported and the cycle moves on to the next.

use crate::catalog::{AppCatalog, AppSpec};
use crate::clock::Clock;
use crate::error::AutoscalerError;
use crate::events::{CycleEvent, EventSink};
use crate::platform::{Namespace, PlatformApp, PlatformClient, Session, Snapshot};
use crate::policy;
use crate::scheduler::Tick;
use crate::session::SessionManager;
use crate::source::MetricBackends;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// What a finished cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The cycle ended before evaluating apps (no session or no snapshot)
    pub aborted: bool,
    pub scaled: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub failed: usize,
}

enum AppOutcome {
    Scaled,
    Unchanged,
}

pub struct Orchestrator<P: PlatformClient> {
    catalog: Arc<AppCatalog>,
    namespace: Namespace,
    sessions: SessionManager<P>,
    backends: MetricBackends,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl<P: PlatformClient> Orchestrator<P> {
    pub fn new(
        catalog: AppCatalog,
        namespace: Namespace,
        platform: Arc<P>,
        backends: MetricBackends,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let sessions = SessionManager::new(platform, clock.clone(), events.clone());
        Self {
            catalog: Arc::new(catalog),
            namespace,
            sessions,
            backends,
            clock,
            events,
        }
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    /// Run one evaluation cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let session = match self.sessions.get_session().await {
            Some(session) => session,
            None => {
                self.events.emit(&CycleEvent::SessionUnavailable);
                report.aborted = true;
                return report;
            }
        };

        let snapshot = match self.snapshot(&session).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.sessions.invalidate();
                self.events.emit(&CycleEvent::SnapshotFailed {
                    namespace: self.namespace.to_string(),
                    error: e.to_string(),
                });
                report.aborted = true;
                return report;
            }
        };
        debug!(apps = snapshot.len(), namespace = %self.namespace, "Fetched platform snapshot");

        let catalog = Arc::clone(&self.catalog);
        for spec in catalog.apps() {
            let app = match snapshot.get(&spec.name) {
                Some(app) => app,
                None => {
                    self.events.emit(&CycleEvent::AppMissing {
                        app: spec.name.clone(),
                    });
                    report.missing += 1;
                    continue;
                }
            };

            match self.evaluate(spec, app, &session).await {
                Ok(AppOutcome::Scaled) => report.scaled += 1,
                Ok(AppOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    self.report_failure(spec, app, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn snapshot(&self, session: &Session) -> Result<Snapshot, AutoscalerError> {
        self.sessions
            .client()
            .list_apps(session, &self.namespace)
            .await
            .map(|apps| apps.into_iter().collect())
            .map_err(|source| AutoscalerError::Snapshot {
                org: self.namespace.org.clone(),
                space: self.namespace.space.clone(),
                source,
            })
    }

    async fn evaluate(
        &self,
        spec: &AppSpec,
        app: &PlatformApp,
        session: &Session,
    ) -> Result<AppOutcome, AutoscalerError> {
        let sample = spec
            .source
            .produce_demand(&self.backends, self.clock.now())
            .await
            .map_err(|source| AutoscalerError::MetricSource {
                app: spec.name.clone(),
                source,
            })?;

        self.events.emit(&CycleEvent::DemandSampled {
            app: spec.name.clone(),
            kind: spec.source.kind(),
            demand: sample.value,
            surge_queue_length: sample.surge_queue_length,
        });

        let desired = if sample.surging() {
            policy::bound(
                spec.max_instances,
                app.instances,
                spec.min_instances,
                spec.max_instances,
            )
        } else {
            policy::desired(
                sample.value,
                spec.unit_capacity,
                app.instances,
                spec.min_instances,
                spec.max_instances,
            )
        };

        if desired == app.instances {
            self.events.emit(&CycleEvent::Unchanged {
                app: spec.name.clone(),
                instances: desired,
            });
            return Ok(AppOutcome::Unchanged);
        }

        self.sessions
            .client()
            .set_instance_count(session, &app.id, desired)
            .await
            .map_err(|source| AutoscalerError::ScaleCommand {
                app: spec.name.clone(),
                instances: desired,
                source,
            })?;

        self.events.emit(&CycleEvent::Scaled {
            app: spec.name.clone(),
            from: app.instances,
            to: desired,
        });
        Ok(AppOutcome::Scaled)
    }

    fn report_failure(&mut self, spec: &AppSpec, app: &PlatformApp, err: AutoscalerError) {
        match &err {
            AutoscalerError::ScaleCommand {
                instances, source, ..
            } => {
                self.events.emit(&CycleEvent::ScaleFailed {
                    app: spec.name.clone(),
                    from: app.instances,
                    to: *instances,
                    error: err.to_string(),
                });
                if source.is_auth() {
                    self.sessions.invalidate();
                }
            }
            _ => {
                self.events.emit(&CycleEvent::MetricFailed {
                    app: spec.name.clone(),
                    kind: spec.source.kind(),
                    error: err.to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl<P: PlatformClient> Tick for Orchestrator<P> {
    async fn tick(&mut self) {
        let report = self.run_cycle().await;
        info!(
            aborted = report.aborted,
            scaled = report.scaled,
            unchanged = report.unchanged,
            missing = report.missing,
            failed = report.failed,
            "Cycle complete"
        );
    }
}
