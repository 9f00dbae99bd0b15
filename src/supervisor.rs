//! Session supervision: inactivity checks, visibility changes, cross-handle logout

use crate::auth_client::ApiClient;
use crate::storage::{StorageEvent, StorageEvents};
use crate::token_store::ACCESS_TOKEN_KEY;
use crate::transport::Transport;
use crate::types::now_millis;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Receives user interaction (pointer, key, scroll, touch) from the UI adapter
pub trait ActivitySink {
    fn record_activity(&self);
}

/// Keeps the session alive while the user is around and ends it when it cannot be
pub struct SessionSupervisor<T: Transport> {
    client: Arc<ApiClient<T>>,
}

impl<T: Transport> SessionSupervisor<T> {
    pub fn new(client: Arc<ApiClient<T>>) -> Arc<Self> {
        Arc::new(Self { client })
    }

    pub fn client(&self) -> &Arc<ApiClient<T>> {
        &self.client
    }

    /// Returns whether the session is usable after the check.
    ///
    /// An authenticated session that is neither idle past the session timeout
    /// nor holding an expired access token is left alone: no network call.
    /// Otherwise a refresh is attempted; failure ends the session.
    pub async fn check_session(&self) -> bool {
        self.check_session_at(now_millis()).await
    }

    pub(crate) async fn check_session_at(&self, now: i64) -> bool {
        if !self.client.is_authenticated() {
            return false;
        }

        let idle = self
            .client
            .session()
            .is_idle_at(now, self.client.config().session_timeout);
        let token_expired = self.client.token_store().access_token_expired();
        if !idle && !token_expired {
            return true;
        }

        debug!(idle = %idle, token_expired = %token_expired, "Session check requires refresh");
        match self.client.refresh_session().await {
            Ok(_) => {
                self.client.session().record_activity_at(now);
                true
            }
            Err(e) => {
                // refresh_session already cleared credentials and redirected
                warn!(error = %e, "Session check failed");
                false
            }
        }
    }

    /// Run a session check when the page becomes visible again.
    pub async fn on_visibility_change(&self, visible: bool) -> Option<bool> {
        if !visible {
            return None;
        }
        Some(self.check_session().await)
    }

    /// React to a change made through another storage handle.
    ///
    /// Returns true if it ended the local session.
    pub fn handle_storage_event(&self, event: &StorageEvent) -> bool {
        let access_token_removed = event.key == ACCESS_TOKEN_KEY && event.new_value.is_none();
        if !access_token_removed || !self.client.is_authenticated() {
            return false;
        }

        self.client.handle_external_logout();
        true
    }

    /// Start the periodic check and the storage listener on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.run().await })
    }

    async fn run(&self) {
        let period = self.client.config().session_check_interval;
        info!(check_interval_secs = %period.as_secs(), "Started session supervisor");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events = self.client.storage().subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_session().await;
                }
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        self.handle_storage_event(&event);
                    }
                    None => {
                        debug!("Storage event stream closed");
                        events = None;
                    }
                },
            }
        }
    }
}

impl<T: Transport> ActivitySink for SessionSupervisor<T> {
    fn record_activity(&self) {
        self.client.session().record_activity();
    }
}

async fn next_event(events: &mut Option<StorageEvents>) -> Option<StorageEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
