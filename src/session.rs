//! Session state and its persisted snapshot

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{now_millis, UserInfo};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

pub const SESSION_KEY: &str = "auth_session";

/// Who is logged in and when they last did something
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<UserInfo>,
    pub is_authenticated: bool,
    /// Milliseconds since epoch
    pub last_activity: i64,
}

/// Fields that survive a reload; `last_activity` is not one of them.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    user: Option<UserInfo>,
    is_authenticated: bool,
}

impl From<&SessionState> for PersistedSession {
    fn from(state: &SessionState) -> Self {
        Self {
            user: state.user.clone(),
            is_authenticated: state.is_authenticated,
        }
    }
}

/// In-memory session state mirrored to storage
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Rehydrate from storage. A corrupt snapshot is discarded, and the
    /// activity clock restarts at load time.
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let persisted = storage
            .get(SESSION_KEY)
            .and_then(|raw| match serde_json::from_str::<PersistedSession>(&raw) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable session snapshot");
                    None
                }
            });

        let state = SessionState {
            is_authenticated: persisted.as_ref().is_some_and(|p| p.is_authenticated),
            user: persisted.and_then(|p| p.user),
            last_activity: now_millis(),
        };

        Self {
            storage,
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated
    }

    pub fn user(&self) -> Option<UserInfo> {
        self.lock().user.clone()
    }

    /// Mark the session authenticated as `user`.
    pub fn login(&self, user: UserInfo) -> Result<()> {
        self.update(|state| {
            state.user = Some(user);
            state.is_authenticated = true;
            state.last_activity = now_millis();
        })
    }

    /// Replace the user info, e.g. after a profile edit or a refresh that returned it.
    pub fn set_user(&self, user: UserInfo) -> Result<()> {
        self.update(|state| state.user = Some(user))
    }

    /// Forget the user. Safe to call when already logged out.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.lock();
            state.user = None;
            state.is_authenticated = false;
        }
        self.storage.remove(SESSION_KEY)
    }

    pub fn record_activity(&self) {
        self.record_activity_at(now_millis());
    }

    pub fn record_activity_at(&self, at_millis: i64) {
        self.lock().last_activity = at_millis;
    }

    pub fn last_activity(&self) -> i64 {
        self.lock().last_activity
    }

    /// True once `timeout` has passed since the last recorded activity.
    pub fn is_idle_at(&self, now_millis: i64, timeout: Duration) -> bool {
        let idle_for = now_millis.saturating_sub(self.last_activity());
        idle_for >= timeout.as_millis() as i64
    }

    fn update<F: FnOnce(&mut SessionState)>(&self, apply: F) -> Result<()> {
        let snapshot = {
            let mut state = self.lock();
            apply(&mut state);
            PersistedSession::from(&*state)
        };
        let raw = serde_json::to_string(&snapshot)?;
        self.storage.set(SESSION_KEY, &raw)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
