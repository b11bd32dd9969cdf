//! HTTP Sender (component B): a stateless POST + response classifier.

use crate::error::SendOutcome;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared, cloneable HTTP sender. Holds a pooled `reqwest::Client`; carries
/// no per-send state, matching spec §4.B's "stateless helper" framing.
#[derive(Clone, Debug)]
pub struct HttpSender {
    client: reqwest::Client,
    token: String,
}

impl HttpSender {
    /// Build a sender. `insecure` disables TLS certificate verification,
    /// for use against a plaintext/self-signed ingest endpoint.
    pub fn new(token: impl Into<String>, insecure: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            token: token.into(),
        }
    }

    /// POST `payload` (already a JSON object) to `endpoint`, with the token
    /// spliced into the top-level `token` field, and classify the
    /// response per spec §4.B.
    pub async fn send<T: Serialize>(&self, endpoint: &str, payload: &T) -> SendOutcome {
        let mut body = match serde_json::to_value(payload) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        body.insert(
            "token".to_string(),
            serde_json::Value::String(self.token.clone()),
        );

        let resp = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(&serde_json::Value::Object(body))
            .send()
            .await;

        match resp {
            Ok(r) => SendOutcome::from_status(r.status().as_u16()),
            Err(e) => SendOutcome::NetworkError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn classifies_2xx_as_ok() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/message")
            .with_status(200)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let outcome = sender
            .send(&format!("{}/api/message", server.url()), &json!({"a": 1}))
            .await;

        m.assert_async().await;
        assert_eq!(outcome, SendOutcome::Ok);
    }

    #[tokio::test]
    async fn classifies_401_as_invalid_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/message")
            .with_status(401)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let outcome = sender
            .send(&format!("{}/api/message", server.url()), &json!({}))
            .await;

        assert_eq!(outcome, SendOutcome::InvalidToken);
        assert!(outcome.is_fatal());
    }

    #[tokio::test]
    async fn classifies_5xx_as_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/message")
            .with_status(503)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let outcome = sender
            .send(&format!("{}/api/message", server.url()), &json!({}))
            .await;

        match outcome {
            SendOutcome::ServerError { status, .. } => assert_eq!(status, 503),
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_carries_token_in_body() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/message")
            .match_body(mockito::Matcher::PartialJson(json!({"token": "secret"})))
            .with_status(200)
            .create_async()
            .await;

        let sender = HttpSender::new("secret", false);
        sender
            .send(&format!("{}/api/message", server.url()), &json!({"logs": []}))
            .await;

        m.assert_async().await;
    }
}
