//! Lifecycle of the platform session
//!
//! Logs in lazily, holds at most one session, and waits out a fixed cooldown
//! after a failed login so repeated attempts do not lock the account.

use crate::clock::Clock;
use crate::error::AutoscalerError;
use crate::events::{CycleEvent, EventSink};
use crate::platform::{PlatformClient, Session};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wait after a failed login before the cycle gives up
pub const LOGIN_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Session),
}

pub struct SessionManager<P: PlatformClient> {
    client: Arc<P>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    state: SessionState,
}

impl<P: PlatformClient> SessionManager<P> {
    pub fn new(client: Arc<P>, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            clock,
            events,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn client(&self) -> &P {
        &self.client
    }

    /// The live session, logging in first if there is none
    ///
    /// Returns `None` after a failed login and its cooldown; the caller should
    /// skip platform work until the next tick.
    pub async fn get_session(&mut self) -> Option<Session> {
        if let SessionState::Authenticated(session) = &self.state {
            return Some(session.clone());
        }

        match self.client.authenticate().await {
            Ok(session) => {
                info!("Authenticated with platform");
                self.state = SessionState::Authenticated(session.clone());
                Some(session)
            }
            Err(source) => {
                self.events.emit(&CycleEvent::LoginFailed {
                    error: AutoscalerError::Authentication { source }.to_string(),
                    cooldown: LOGIN_COOLDOWN,
                });
                self.clock.sleep(LOGIN_COOLDOWN).await;
                None
            }
        }
    }

    /// Drop the cached session so the next call logs in again
    pub fn invalidate(&mut self) {
        if self.state != SessionState::Unauthenticated {
            debug!("Invalidating platform session");
        }
        self.state = SessionState::Unauthenticated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PlatformError;
    use crate::events::RecordingEventSink;
    use crate::platform::{Namespace, PlatformApp};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingLogin {
        attempts: AtomicU32,
        succeed: bool,
    }

    #[async_trait]
    impl PlatformClient for CountingLogin {
        async fn authenticate(&self) -> Result<Session, PlatformError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(Session::new(format!("token-{}", n)))
            } else {
                Err(PlatformError::Unauthorized {
                    message: "bad credentials".to_string(),
                })
            }
        }

        async fn list_apps(
            &self,
            _: &Session,
            _: &Namespace,
        ) -> Result<Vec<PlatformApp>, PlatformError> {
            Ok(vec![])
        }

        async fn set_instance_count(
            &self,
            _: &Session,
            _: &str,
            _: u32,
        ) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn manager(
        succeed: bool,
    ) -> (
        SessionManager<CountingLogin>,
        Arc<ManualClock>,
        Arc<RecordingEventSink>,
    ) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let events = Arc::new(RecordingEventSink::new());
        let client = Arc::new(CountingLogin {
            attempts: AtomicU32::new(0),
            succeed,
        });
        (
            SessionManager::new(client, clock.clone(), events.clone()),
            clock,
            events,
        )
    }

    #[tokio::test]
    async fn test_session_is_cached() {
        let (mut sessions, clock, _) = manager(true);

        let first = sessions.get_session().await;
        let second = sessions.get_session().await;

        assert_eq!(first, Some(Session::new("token-0")));
        assert_eq!(first, second);
        assert_eq!(sessions.client().attempts.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_login() {
        let (mut sessions, _, _) = manager(true);

        sessions.get_session().await;
        sessions.invalidate();
        assert_eq!(sessions.state(), &SessionState::Unauthenticated);

        let session = sessions.get_session().await;
        assert_eq!(session, Some(Session::new("token-1")));
    }

    #[tokio::test]
    async fn test_failed_login_waits_cooldown() {
        let (mut sessions, clock, events) = manager(false);

        assert!(sessions.get_session().await.is_none());
        assert_eq!(sessions.state(), &SessionState::Unauthenticated);
        assert_eq!(clock.sleeps(), vec![LOGIN_COOLDOWN]);
        assert!(matches!(
            events.events().as_slice(),
            [CycleEvent::LoginFailed { .. }]
        ));

        // Each call retries once; there is no backoff beyond the cooldown
        assert!(sessions.get_session().await.is_none());
        assert_eq!(sessions.client().attempts.load(Ordering::SeqCst), 2);
        assert_eq!(clock.sleeps(), vec![LOGIN_COOLDOWN, LOGIN_COOLDOWN]);
    }
}
