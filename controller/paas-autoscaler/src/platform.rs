//! Platform control-plane seam
//!
//! The orchestrator only needs three calls from the platform: log in, list
//! the apps of one org/space, and set an app's instance count.

use crate::error::PlatformError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Organization and space an autoscaler instance is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub org: String,
    pub space: String,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.space)
    }
}

/// Authenticated handle to the control plane
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("token", &"<redacted>").finish()
    }
}

/// An app as the platform reports it this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformApp {
    pub name: String,
    pub id: String,
    pub instances: u32,
}

/// Apps in the namespace keyed by name
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    apps: HashMap<String, PlatformApp>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&PlatformApp> {
        self.apps.get(name)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl FromIterator<PlatformApp> for Snapshot {
    fn from_iter<I: IntoIterator<Item = PlatformApp>>(iter: I) -> Self {
        Self {
            apps: iter
                .into_iter()
                .map(|app| (app.name.clone(), app))
                .collect(),
        }
    }
}

/// Platform client trait - implement this to drive a different control plane
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Log in with the configured credentials
    async fn authenticate(&self) -> Result<Session, PlatformError>;

    /// Every app currently deployed in `namespace`
    async fn list_apps(
        &self,
        session: &Session,
        namespace: &Namespace,
    ) -> Result<Vec<PlatformApp>, PlatformError>;

    /// Set the instance count of the app with platform id `app_id`
    async fn set_instance_count(
        &self,
        session: &Session,
        app_id: &str,
        instances: u32,
    ) -> Result<(), PlatformError>;
}
