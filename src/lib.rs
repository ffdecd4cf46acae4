//! z2api - an OpenAI-compatible proxy for Z.AI's chat service
//!
//! This library exposes Z.AI's cookie-authenticated, always-streaming chat
//! endpoint behind the standard Chat Completions API: typed request
//! validation, tool-declaration translation, cookie rotation, and SSE
//! re-shaping for both streaming and non-streaming callers.

use axum::Router;
use axum::http::Uri;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

pub mod auth;
pub mod client;
pub mod cookies;
pub mod errors;
pub mod handlers;
pub mod schemas;
pub mod streaming;
pub mod transform;
pub mod upstream;
pub mod zai;

use auth::ApiKey;
use client::{HttpClient, HyperClient};
use cookies::CookiePool;
use handlers::{chat_completions, health, models};

/// Static per-process settings shared by all handlers.
#[derive(Clone, Debug)]
pub struct ProxySettings {
    pub api_key: ApiKey,
    /// The model name advertised to clients; anything else is rejected.
    pub model_name: String,
    /// The Z.AI-side model id requests are rewritten to.
    pub upstream_model: String,
    pub upstream_url: Uri,
    /// Pass thinking content through as `<think>` tags instead of
    /// stripping it.
    pub show_think_tags: bool,
}

/// The main application state: HTTP client, cookie pool, and settings.
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub cookies: CookiePool,
    pub settings: Arc<ProxySettings>,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(
        settings: ProxySettings,
        cookies: CookiePool,
        pool_max_idle_per_host: usize,
        pool_idle_timeout: Duration,
    ) -> Self {
        let http_client = client::create_hyper_client(pool_max_idle_per_host, pool_idle_timeout);
        Self {
            http_client,
            cookies,
            settings: Arc::new(settings),
        }
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(settings: ProxySettings, cookies: CookiePool, http_client: T) -> Self {
        Self {
            http_client,
            cookies,
            settings: Arc::new(settings),
        }
    }
}

/// Seconds since the Unix epoch, for `created` fields and upstream
/// variables.
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the main router for the proxy
/// This creates routes for:
/// - `/v1/chat/completions` - The chat endpoint, streaming or not
/// - `/v1/models` - Returns the advertised model
/// - `/health` - Liveness probe
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .route("/health", get(health))
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;
    use test_utils::MockHttpClient;

    const API_KEY: &str = "sk-test-key";

    fn settings(show_think_tags: bool) -> ProxySettings {
        ProxySettings {
            api_key: ApiKey::new(API_KEY),
            model_name: "GLM-4.5".to_string(),
            upstream_model: "0727-360B-API".to_string(),
            upstream_url: "https://chat.z.ai/api/chat/completions".parse().unwrap(),
            show_think_tags,
        }
    }

    fn server_with(mock: MockHttpClient, cookies: Vec<String>, show_think_tags: bool) -> TestServer {
        let state = AppState::with_client(settings(show_think_tags), CookiePool::new(cookies), mock);
        TestServer::new(build_router(state)).unwrap()
    }

    fn server(mock: MockHttpClient) -> TestServer {
        server_with(mock, vec!["cookie-1".to_string()], false)
    }

    fn event(delta: &str, phase: &str) -> String {
        format!(
            "data: {}\n",
            json!({"data": {"delta_content": delta, "phase": phase}})
        )
    }

    fn answer_stream() -> Vec<String> {
        vec![
            event("Hello", "answer"),
            event(" world", "answer"),
            "data: [DONE]\n".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_missing_auth_rejected() {
        let server = server(MockHttpClient::new(StatusCode::OK, "unused"));

        let response = server
            .post("/v1/chat/completions")
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        assert_eq!(response.status_code(), 401);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["message"], "Authorization header required");
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_wrong_api_key_rejected() {
        let server = server(MockHttpClient::new(StatusCode::OK, "unused"));

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", "Bearer sk-wrong")
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        assert_eq!(response.status_code(), 401);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["message"], "Invalid API key");
    }

    #[tokio::test]
    async fn test_unknown_model_rejected() {
        let mock = MockHttpClient::new(StatusCode::OK, "unused");
        let server = server(mock.clone());

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        assert_eq!(response.status_code(), 400);
        let body: serde_json::Value = response.json();
        assert_eq!(
            body["error"]["message"],
            "Model 'gpt-4' not supported. Use 'GLM-4.5'"
        );
        assert!(mock.get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_validation_reports_all_violations() {
        let server = server(MockHttpClient::new(StatusCode::OK, "unused"));

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "messages": [{"role": "moderator", "content": "hi"}],
                "temperature": "hot"
            }))
            .await;

        assert_eq!(response.status_code(), 400);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        let violations = body["error"]["violations"].as_array().unwrap();
        let fields: Vec<&str> = violations
            .iter()
            .map(|v| v["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"model"));
        assert!(fields.contains(&"messages[0].role"));
        assert!(fields.contains(&"temperature"));
    }

    #[tokio::test]
    async fn test_no_cookies_yields_503() {
        let mock = MockHttpClient::new(StatusCode::OK, "unused");
        let server = server_with(mock, Vec::new(), false);

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        assert_eq!(response.status_code(), 503);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["type"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_non_streaming_aggregates_answer() {
        let mock = MockHttpClient::new_streaming(
            StatusCode::OK,
            vec![
                event("pondering...", "thinking"),
                event("Hello", "answer"),
                event(" world", "answer"),
                "data: [DONE]\n".to_string(),
            ],
        );
        let server = server(mock.clone());

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        assert_eq!(response.status_code(), 200);
        let body: serde_json::Value = response.json();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "GLM-4.5");
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert_eq!(body["choices"][0]["message"]["content"], "Hello world");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn test_streaming_relays_chunks() {
        let mock = MockHttpClient::new_streaming(StatusCode::OK, answer_stream());
        let server = server(mock);

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}],
                "stream": true
            }))
            .await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let text = response.text();
        assert!(text.contains(r#""object":"chat.completion.chunk""#));
        assert!(text.contains(r#""content":"Hello""#));
        assert!(text.contains(r#""finish_reason":"stop""#));
        assert!(text.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_upstream_payload_shape() {
        let mock = MockHttpClient::new_streaming(StatusCode::OK, answer_stream());
        let server = server(mock.clone());

        server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].uri, "https://chat.z.ai/api/chat/completions");

        let forwarded: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        // Model id rewritten, stream forced on regardless of the caller.
        assert_eq!(forwarded["model"], "0727-360B-API");
        assert_eq!(forwarded["stream"], true);
        assert_eq!(forwarded["messages"][0]["content"], "Hello");
        assert_eq!(forwarded["model_item"]["name"], "GLM-4.5");

        let auth = requests[0]
            .headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .map(|(_, v)| v.clone());
        assert_eq!(auth, Some("Bearer cookie-1".to_string()));
    }

    #[tokio::test]
    async fn test_tools_translated_to_flat_triples() {
        let mock = MockHttpClient::new_streaming(StatusCode::OK, answer_stream());
        let server = server(mock.clone());

        server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "What's the weather?"}],
                "tools": [
                    {
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "description": "Look up current weather",
                            "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                        }
                    },
                    {"type": "retrieval"},
                    {"type": "function", "function": {"name": "get_time"}}
                ]
            }))
            .await;

        let forwarded: serde_json::Value =
            serde_json::from_slice(&mock.get_requests()[0].body).unwrap();
        let tool_servers = forwarded["tool_servers"].as_array().unwrap();
        // The retrieval entry is dropped; function entries keep their order.
        assert_eq!(tool_servers.len(), 2);
        assert_eq!(tool_servers[0]["name"], "get_weather");
        assert_eq!(tool_servers[0]["description"], "Look up current weather");
        assert_eq!(
            tool_servers[0]["parameters"]["properties"]["city"]["type"],
            "string"
        );
        assert_eq!(tool_servers[1]["name"], "get_time");
        assert_eq!(tool_servers[1]["description"], serde_json::Value::Null);
        assert_eq!(tool_servers[1]["parameters"], json!({}));

        assert_eq!(forwarded["features"]["code_interpreter"], true);
    }

    #[tokio::test]
    async fn test_think_tags_passed_through_when_enabled() {
        let mock = MockHttpClient::new_streaming(
            StatusCode::OK,
            vec![
                event("<details open><summary>Thought</summary>hmm</details>", "thinking"),
                event("Four.", "answer"),
                "data: [DONE]\n".to_string(),
            ],
        );
        let server = server_with(mock, vec!["cookie-1".to_string()], true);

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "2+2?"}]
            }))
            .await;

        let body: serde_json::Value = response.json();
        assert_eq!(
            body["choices"][0]["message"]["content"],
            "<think>hmm</think>Four."
        );
    }

    #[tokio::test]
    async fn test_upstream_error_status_propagates() {
        let mock = MockHttpClient::new(StatusCode::TOO_MANY_REQUESTS, r#"{"detail": "slow down"}"#);
        let server = server(mock);

        let response = server
            .post("/v1/chat/completions")
            .add_header("authorization", format!("Bearer {API_KEY}"))
            .json(&json!({
                "model": "GLM-4.5",
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .await;

        assert_eq!(response.status_code(), 429);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["type"], "upstream_error");
        assert_eq!(body["error"]["message"], "Upstream error: slow down");
    }

    #[tokio::test]
    async fn test_models_endpoint_lists_advertised_model() {
        let server = server(MockHttpClient::new(StatusCode::OK, "unused"));

        let response = server.get("/v1/models").await;
        assert_eq!(response.status_code(), 200);

        let body: serde_json::Value = response.json();
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "GLM-4.5");
        assert_eq!(body["data"][0]["object"], "model");
        assert_eq!(body["data"][0]["owned_by"], "z-ai");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = server(MockHttpClient::new(StatusCode::OK, "unused"));

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), 200);

        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"], "GLM-4.5");
    }
}
