//! Scripted transport and navigator used by the unit tests

use crate::auth_client::Navigator;
use crate::error::{ClientError, Result};
use crate::transport::{OutgoingRequest, RawResponse, Transport};
use crate::types::LogoutReason;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct Reply {
    delay: Option<Duration>,
    result: Result<RawResponse>,
}

impl Reply {
    pub(crate) fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            delay: None,
            result: Ok(RawResponse {
                status,
                body: body.into(),
            }),
        }
    }

    pub(crate) fn timeout() -> Self {
        Self {
            delay: None,
            result: Err(ClientError::Timeout),
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = dyn Fn(&OutgoingRequest) -> Reply + Send + Sync;

#[derive(Clone)]
pub(crate) struct MockTransport {
    handler: Arc<Handler>,
    log: Arc<Mutex<Vec<OutgoingRequest>>>,
}

impl MockTransport {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&OutgoingRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn requests(&self) -> Vec<OutgoingRequest> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse> {
        let reply = (self.handler)(&request);
        self.log.lock().unwrap().push(request);

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}

#[derive(Default)]
pub(crate) struct RecordingNavigator {
    redirects: Mutex<Vec<LogoutReason>>,
}

impl RecordingNavigator {
    pub(crate) fn redirects(&self) -> Vec<LogoutReason> {
        self.redirects.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self, _login_path: &str, reason: &LogoutReason) {
        self.redirects.lock().unwrap().push(reason.clone());
    }
}

/// Envelope carrying a token pair, as login and refresh return it.
pub(crate) fn token_envelope(access_token: &str, refresh_token: &str) -> String {
    serde_json::json!({
        "success": true,
        "message": "ok",
        "data": {
            "accessToken": access_token,
            "refreshToken": refresh_token,
            "tokenType": "Bearer",
            "expiresIn": 900,
            "user": {"id": "u-1", "email": "agent@crm.test", "name": "Agent"}
        },
        "timestamp": "2026-01-01T00:00:00Z"
    })
    .to_string()
}

/// Success envelope whose `data` is the request path, to tell replies apart.
pub(crate) fn echo_envelope(path: &str) -> String {
    serde_json::json!({
        "success": true,
        "message": "ok",
        "data": path,
        "timestamp": "2026-01-01T00:00:00Z"
    })
    .to_string()
}

pub(crate) fn unauthorized() -> Reply {
    Reply::json(
        401,
        r#"{"success":false,"message":"Token expired","errorCode":"TOKEN_EXPIRED","timestamp":"2026-01-01T00:00:00Z"}"#,
    )
}
