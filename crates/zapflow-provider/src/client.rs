// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Evolution-style messaging provider API.
//!
//! Stateless request/response only: one method per provider operation, no
//! retries beyond the documented 401 header-shape fallback, and no access to
//! the persisted store. Callers decide retry policy.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use zapflow_core::ZapflowError;

use crate::error_extract::extract_provider_error;
use crate::types::{ProviderChat, ProviderMessage};

/// Webhook events registered with the provider on session creation.
const WEBHOOK_EVENTS: [&str; 2] = ["MESSAGES_UPSERT", "CONNECTION_UPDATE"];

/// Result of a create-session call.
#[derive(Debug, Clone)]
pub struct CreateInstanceResult {
    /// Pairing artifact, when the create response already carries one.
    pub pairing_code: Option<String>,
}

/// Result of a connect / get-pairing call.
#[derive(Debug, Clone)]
pub struct Pairing {
    /// Base64 QR image, possibly without the `data:` prefix.
    pub base64: Option<String>,
    /// Plain pairing code string, as a fallback for the QR image.
    pub code: Option<String>,
}

/// HTTP client for provider commands.
///
/// Credentials are passed in explicitly (never read from ambient environment)
/// so tests can point the client at a fake server.
#[derive(Debug, Clone)]
pub struct EvolutionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EvolutionClient {
    /// Creates a new provider client with a bounded request timeout.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ZapflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ZapflowError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Overrides the base URL (for tests against a mock server).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Create a provider session, registering the inbound webhook.
    ///
    /// On 401, retries exactly once with an `Authorization: Bearer` header
    /// instead of `apikey` — a documented provider quirk, not a generic
    /// retry policy.
    pub async fn create_instance(
        &self,
        instance: &str,
        webhook_url: &str,
    ) -> Result<CreateInstanceResult, ZapflowError> {
        let url = self.url("/instance/create");
        let body = serde_json::json!({
            "instanceName": instance,
            "qrcode": true,
            "integration": "WHATSAPP-BAILEYS",
            "webhook": {
                "url": webhook_url,
                "byEvents": false,
                "base64": false,
                "events": WEBHOOK_EVENTS,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;
        let (mut status, mut data) = read_body(response).await;
        debug!(instance, status = %status, "create instance response");

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(instance, "create rejected with 401, retrying with Bearer header");
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
                .map_err(transport_err)?;
            (status, data) = read_body(response).await;
            debug!(instance, status = %status, "create instance response (Bearer)");
        }

        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to create instance"));
        }

        Ok(CreateInstanceResult {
            pairing_code: data
                .pointer("/qrcode/base64")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Request a pairing artifact for an existing session.
    pub async fn connect(&self, instance: &str) -> Result<Pairing, ZapflowError> {
        let response = self
            .client
            .get(self.url(&format!("/instance/connect/{instance}")))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to get pairing code"));
        }
        let base64 = data
            .get("base64")
            .and_then(Value::as_str)
            .or_else(|| data.pointer("/qrcode/base64").and_then(Value::as_str))
            .map(str::to_string);
        let code = data.get("code").and_then(Value::as_str).map(str::to_string);
        Ok(Pairing { base64, code })
    }

    /// Probe the session's connection state (`open`, `connecting`, `close`).
    pub async fn connection_state(&self, instance: &str) -> Result<Option<String>, ZapflowError> {
        let response = self
            .client
            .get(self.url(&format!("/instance/connectionState/{instance}")))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to get connection state"));
        }
        let state = data
            .get("state")
            .and_then(Value::as_str)
            .or_else(|| data.pointer("/instance/state").and_then(Value::as_str))
            .map(str::to_string);
        Ok(state)
    }

    /// Log the session out without deleting it.
    pub async fn logout(&self, instance: &str) -> Result<(), ZapflowError> {
        let response = self
            .client
            .delete(self.url(&format!("/instance/logout/{instance}")))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to logout instance"));
        }
        Ok(())
    }

    /// Tear the session down completely.
    pub async fn delete_instance(&self, instance: &str) -> Result<(), ZapflowError> {
        let response = self
            .client
            .delete(self.url(&format!("/instance/delete/{instance}")))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to delete instance"));
        }
        Ok(())
    }

    /// Send a text message. Returns the provider message id when reported.
    pub async fn send_text(
        &self,
        instance: &str,
        number: &str,
        text: &str,
    ) -> Result<Option<String>, ZapflowError> {
        let response = self
            .client
            .post(self.url(&format!("/message/sendText/{instance}")))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "number": number, "text": text }))
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to send message"));
        }
        Ok(data
            .pointer("/key/id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// List the session's chats.
    pub async fn find_chats(&self, instance: &str) -> Result<Vec<ProviderChat>, ZapflowError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/findChats/{instance}")))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to fetch chats"));
        }
        Ok(parse_entries(&data, instance))
    }

    /// Fetch up to `limit` historical messages of one chat.
    pub async fn find_messages(
        &self,
        instance: &str,
        remote_jid: &str,
        limit: u32,
    ) -> Result<Vec<ProviderMessage>, ZapflowError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/findMessages/{instance}")))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "where": { "key": { "remoteJid": remote_jid } },
                "limit": limit,
            }))
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to fetch messages"));
        }
        // The endpoint answers either a bare array or `{ "messages": [...] }`.
        let entries = if data.is_array() {
            parse_entries(&data, instance)
        } else if let Some(messages) = data.get("messages") {
            parse_entries(messages, instance)
        } else {
            Vec::new()
        };
        Ok(entries)
    }

    /// (Re)register the inbound webhook on an existing session.
    ///
    /// Tries the `instance/update` shape first, falling back to the direct
    /// webhook endpoint some provider versions expose instead.
    pub async fn set_webhook(&self, instance: &str, webhook_url: &str) -> Result<(), ZapflowError> {
        let webhook = serde_json::json!({
            "url": webhook_url,
            "byEvents": false,
            "base64": false,
            "events": WEBHOOK_EVENTS,
        });
        let response = self
            .client
            .put(self.url(&format!("/instance/update/{instance}")))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "webhook": webhook }))
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if status.is_success() {
            return Ok(());
        }

        debug!(instance, status = %status, "webhook update failed, trying alternative endpoint");
        let response = self
            .client
            .post(self.url(&format!("/instance/{instance}/webhook")))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "url": webhook_url,
                "enabled": true,
                "events": WEBHOOK_EVENTS,
            }))
            .send()
            .await
            .map_err(transport_err)?;
        let (alt_status, alt_data) = read_body(response).await;
        if !alt_status.is_success() {
            let message = extract_provider_error(&alt_data)
                .or_else(|| extract_provider_error(&data))
                .unwrap_or_else(|| format!("failed to set webhook (HTTP {alt_status})"));
            return Err(ZapflowError::Provider {
                message,
                source: None,
            });
        }
        Ok(())
    }

    /// List every session on the provider. Doubles as an API-key validation probe.
    pub async fn fetch_instances(&self) -> Result<Value, ZapflowError> {
        let response = self
            .client
            .get(self.url("/instance/fetchInstances"))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_err)?;
        let (status, data) = read_body(response).await;
        if !status.is_success() {
            return Err(provider_err(status, &data, "failed to fetch instances"));
        }
        Ok(data)
    }
}

/// Deserialize each array entry, skipping (with a warning) entries that do
/// not match the expected shape instead of failing the whole call.
fn parse_entries<T: serde::de::DeserializeOwned>(data: &Value, instance: &str) -> Vec<T> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(instance, error = %e, "skipping malformed provider entry");
                None
            }
        })
        .collect()
}

async fn read_body(response: reqwest::Response) -> (reqwest::StatusCode, Value) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let value = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, value)
}

fn provider_err(status: reqwest::StatusCode, data: &Value, fallback: &str) -> ZapflowError {
    ZapflowError::Provider {
        message: extract_provider_error(data)
            .unwrap_or_else(|| format!("{fallback} (HTTP {status})")),
        source: None,
    }
}

fn transport_err(e: reqwest::Error) -> ZapflowError {
    ZapflowError::Provider {
        message: format!("HTTP request failed: {e}"),
        source: Some(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> EvolutionClient {
        EvolutionClient::new("http://placeholder", "test-key", Duration::from_secs(5))
            .unwrap()
            .with_base_url(base_url.to_string())
    }

    #[tokio::test]
    async fn create_instance_returns_qr_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .and(header("apikey", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "instanceName": "vendas-1",
                "integration": "WHATSAPP-BAILEYS",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "instance": { "instanceName": "vendas-1" },
                "qrcode": { "base64": "iVBORw0KGgo=" }
            })))
            .mount(&server)
            .await;

        let result = test_client(&server.uri())
            .create_instance("vendas-1", "https://crm.example.com/webhooks/provider")
            .await
            .unwrap();
        assert_eq!(result.pairing_code.as_deref(), Some("iVBORw0KGgo="));
    }

    #[tokio::test]
    async fn create_instance_retries_with_bearer_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .and(header("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "Unauthorized"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "qrcode": { "base64": "QQ==" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = test_client(&server.uri())
            .create_instance("vendas-1", "https://crm.example.com/hook")
            .await
            .unwrap();
        assert_eq!(result.pairing_code.as_deref(), Some("QQ=="));
    }

    #[tokio::test]
    async fn create_instance_surfaces_provider_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "response": { "message": ["This name is already in use"] }
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .create_instance("vendas-1", "https://crm.example.com/hook")
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("already in use"),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn connect_finds_qr_under_either_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/connect/vendas-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "qrcode": { "base64": "nested==" },
                "code": "PAIR-123"
            })))
            .mount(&server)
            .await;

        let pairing = test_client(&server.uri()).connect("vendas-1").await.unwrap();
        assert_eq!(pairing.base64.as_deref(), Some("nested=="));
        assert_eq!(pairing.code.as_deref(), Some("PAIR-123"));
    }

    #[tokio::test]
    async fn connection_state_reads_nested_instance_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/vendas-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "instance": { "instanceName": "vendas-1", "state": "open" }
            })))
            .mount(&server)
            .await;

        let state = test_client(&server.uri())
            .connection_state("vendas-1")
            .await
            .unwrap();
        assert_eq!(state.as_deref(), Some("open"));
    }

    #[tokio::test]
    async fn send_text_returns_provider_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/vendas-1"))
            .and(body_partial_json(serde_json::json!({
                "number": "5511999",
                "text": "bom dia!"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "key": { "id": "WAMID-OUT-1" }
            })))
            .mount(&server)
            .await;

        let id = test_client(&server.uri())
            .send_text("vendas-1", "5511999", "bom dia!")
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("WAMID-OUT-1"));
    }

    #[tokio::test]
    async fn find_messages_accepts_wrapped_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/findMessages/vendas-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [
                    { "key": { "remoteJid": "5511999@s.whatsapp.net", "fromMe": false },
                      "message": { "conversation": "oi" } }
                ]
            })))
            .mount(&server)
            .await;

        let messages = test_client(&server.uri())
            .find_messages("vendas-1", "5511999@s.whatsapp.net", 50)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].message.as_ref().unwrap().conversation.as_deref(),
            Some("oi")
        );
    }

    #[tokio::test]
    async fn find_chats_with_non_array_body_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/findChats/vendas-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "unexpected": true })),
            )
            .mount(&server)
            .await;

        let chats = test_client(&server.uri()).find_chats("vendas-1").await.unwrap();
        assert!(chats.is_empty());
    }

    #[tokio::test]
    async fn set_webhook_falls_back_to_alternative_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/instance/update/vendas-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "Cannot PUT /instance/update"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instance/vendas-1/webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "webhook": { "enabled": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        test_client(&server.uri())
            .set_webhook("vendas-1", "https://crm.example.com/hook")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_webhook_error_prefers_alternative_response_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/instance/update/vendas-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "Cannot PUT"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/instance/vendas-1/webhook"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "events list rejected"
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .set_webhook("vendas-1", "https://crm.example.com/hook")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("events list rejected"), "got: {err}");
    }

    #[tokio::test]
    async fn fetch_instances_returns_raw_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/fetchInstances"))
            .and(header("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "instance": { "instanceName": "vendas-1", "status": "open" } }
            ])))
            .mount(&server)
            .await;

        let instances = test_client(&server.uri()).fetch_instances().await.unwrap();
        assert_eq!(instances[0]["instance"]["instanceName"], "vendas-1");
    }

    #[tokio::test]
    async fn logout_propagates_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/instance/logout/vendas-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "Instance not found"
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).logout("vendas-1").await.unwrap_err();
        assert!(err.to_string().contains("Instance not found"), "got: {err}");
    }
}
