//! Request dispatch: bearer header attachment, diagnostics, error normalization

use crate::config::ClientConfig;
use crate::error::{ApiError, ClientError, Result};
use crate::transport::{ApiRequest, OutgoingRequest, RawResponse, Transport};
use serde_json::Value;
use tracing::debug;

/// JSON fields never written to the logs
const REDACTED_FIELDS: &[&str] = &["password", "accessToken", "refreshToken"];

/// Turns [`ApiRequest`]s into wire requests and sends them
pub struct Dispatcher<T: Transport> {
    transport: T,
    config: ClientConfig,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolve the URL and attach `Authorization: Bearer <token>` when a token is given.
    pub fn prepare(&self, request: &ApiRequest, access_token: Option<&str>) -> OutgoingRequest {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        OutgoingRequest {
            method: request.method.clone(),
            url: self.config.url_for(&request.path),
            path: request.path.clone(),
            headers,
            query: request.query.clone(),
            body: request.body.clone(),
        }
    }

    /// Send the request. Every status comes back as `Ok`; the caller decides what a 401 means.
    pub async fn dispatch(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<RawResponse> {
        let outgoing = self.prepare(request, access_token);
        let method = outgoing.method.clone();
        let url = outgoing.url.clone();

        if cfg!(debug_assertions) {
            let payload = outgoing.body.clone().map(redact);
            debug!(method = %method, url = %url, payload = ?payload, "API request");
        }

        let result = self.transport.send(outgoing).await;

        if cfg!(debug_assertions) {
            match &result {
                Ok(response) => debug!(
                    method = %method,
                    url = %url,
                    status = %response.status,
                    payload = %redact_body(&response.body),
                    "API response"
                ),
                Err(e) => debug!(method = %method, url = %url, error = %e, "API request failed"),
            }
        }

        result
    }
}

/// Blank credential fields anywhere in a JSON value.
fn redact(mut value: Value) -> Value {
    match &mut value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if REDACTED_FIELDS.contains(&key.as_str()) {
                    *field = Value::String("***".to_string());
                } else {
                    *field = redact(field.take());
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                *item = redact(item.take());
            }
        }
        _ => {}
    }
    value
}

fn redact_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => redact(value).to_string(),
        Err(_) => body.to_string(),
    }
}

/// Pass successful responses through, normalize everything else into [`ClientError::Api`].
pub fn ensure_success(response: RawResponse, path: &str) -> Result<RawResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Api(ApiError::from_response(
            response.status,
            &response.body,
            path,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, Reply};
    use pretty_assertions::assert_eq;

    fn dispatcher(transport: MockTransport) -> Dispatcher<MockTransport> {
        Dispatcher::new(transport, ClientConfig::new("http://crm.test/api"))
    }

    #[tokio::test]
    async fn test_bearer_header_attached() {
        let transport = MockTransport::new(|_| Reply::json(200, r#"{"success":true}"#));
        let dispatcher = dispatcher(transport.clone());

        let request = ApiRequest::get("/contacts").query("page", "2");
        let response = dispatcher.dispatch(&request, Some("abc")).await.unwrap();
        assert_eq!(response.status, 200);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://crm.test/api/contacts");
        assert_eq!(sent[0].authorization(), Some("Bearer abc"));
        assert_eq!(sent[0].query, vec![("page".to_string(), "2".to_string())]);
    }

    #[tokio::test]
    async fn test_no_token_no_header() {
        let transport = MockTransport::new(|_| Reply::json(200, "{}"));
        let dispatcher = dispatcher(transport.clone());

        dispatcher
            .dispatch(&ApiRequest::get("/public/health"), None)
            .await
            .unwrap();
        dispatcher
            .dispatch(&ApiRequest::get("/public/health"), Some(""))
            .await
            .unwrap();

        assert!(transport.requests().iter().all(|r| r.authorization().is_none()));
    }

    #[tokio::test]
    async fn test_error_statuses_are_returned_not_raised() {
        let transport = MockTransport::new(|_| Reply::json(401, r#"{"message":"Token expired"}"#));
        let dispatcher = dispatcher(transport);

        let response = dispatcher
            .dispatch(&ApiRequest::get("/contacts"), Some("old"))
            .await
            .unwrap();
        assert!(response.is_unauthorized());

        let err = ensure_success(response, "/contacts").unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.to_string(), "Token expired");
    }

    #[test]
    fn test_credentials_redacted_from_logged_payloads() {
        let login = serde_json::json!({"email": "agent@crm.test", "password": "secret"});
        assert_eq!(
            redact(login),
            serde_json::json!({"email": "agent@crm.test", "password": "***"})
        );

        let body = r#"{"success":true,"data":{"accessToken":"a-1","refreshToken":"r-1","user":{"id":"u-1"}}}"#;
        let logged: Value = serde_json::from_str(&redact_body(body)).unwrap();
        assert_eq!(logged["data"]["accessToken"], "***");
        assert_eq!(logged["data"]["refreshToken"], "***");
        assert_eq!(logged["data"]["user"]["id"], "u-1");

        assert_eq!(redact_body("not json"), "not json");
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let transport = MockTransport::new(|_| Reply::timeout());
        let dispatcher = dispatcher(transport);

        let err = dispatcher
            .dispatch(&ApiRequest::get("/analytics"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }
}
