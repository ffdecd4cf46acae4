//! Axum handlers for the OpenAI-compatible surface.

use crate::AppState;
use crate::auth::bearer_token;
use crate::client::HttpClient;
use crate::errors::ProxyError;
use crate::schemas::chat_completions::ChatMessage;
use crate::schemas::validate::{ValidationError, validate_chat_request};
use crate::schemas::{
    ChatCompletionChoice, ChatCompletionResponse, ModelInfo, ModelsResponse,
};
use crate::streaming::{self, OpenAiChunkStream};
use crate::upstream;
use crate::zai::ZaiChatRequest;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{info, instrument};

fn authorize<T: HttpClient>(state: &AppState<T>, headers: &HeaderMap) -> Result<(), ProxyError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ProxyError::MissingAuth)?;
    let token = bearer_token(header).ok_or(ProxyError::MissingAuth)?;
    if !state.settings.api_key.verify(token) {
        return Err(ProxyError::InvalidApiKey);
    }
    Ok(())
}

/// POST /v1/chat/completions
///
/// Validates, translates to the Z.AI payload, dispatches upstream, then
/// either relays OpenAI-shaped SSE chunks or aggregates the stream into a
/// single completion, per the caller's `stream` flag.
#[instrument(skip(state, headers, body))]
pub async fn chat_completions<T: HttpClient>(
    State(state): State<AppState<T>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    authorize(&state, &headers)?;

    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ValidationError::single("body", format!("invalid JSON: {e}")))?;
    let request = validate_chat_request(&body)?;

    if request.model != state.settings.model_name {
        return Err(ProxyError::UnknownModel(
            request.model,
            state.settings.model_name.clone(),
        ));
    }

    info!(
        stream = request.stream,
        messages = request.messages.len(),
        tools = request.tools.as_ref().map_or(0, Vec::len),
        "Chat completion request"
    );

    let payload = ZaiChatRequest::from_openai(
        &request,
        &state.settings.upstream_model,
        &state.settings.model_name,
    );
    let upstream_stream = upstream::send_chat(
        &state.http_client,
        &state.cookies,
        &state.settings.upstream_url,
        &payload,
    )
    .await?;

    if request.stream {
        let chunks = OpenAiChunkStream::new(
            upstream_stream,
            state.settings.model_name.clone(),
            state.settings.show_think_tags,
        );
        let response = Response::builder()
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .header("connection", "keep-alive")
            .body(Body::from_stream(chunks))
            .expect("static SSE response headers");
        Ok(response)
    } else {
        let content =
            streaming::aggregate_content(upstream_stream, state.settings.show_think_tags).await?;
        let response = ChatCompletionResponse {
            id: streaming::completion_id(),
            object: ChatCompletionResponse::OBJECT.into(),
            created: crate::unix_timestamp(),
            model: state.settings.model_name.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason: Some("stop".into()),
            }],
            usage: None,
            system_fingerprint: None,
        };
        Ok(Json(response).into_response())
    }
}

/// GET /v1/models - the single advertised model in OpenAI's catalog shape.
#[instrument(skip(state))]
pub async fn models<T: HttpClient>(State(state): State<AppState<T>>) -> Json<ModelsResponse> {
    Json(ModelsResponse::new(vec![ModelInfo::new(
        state.settings.model_name.clone(),
        "z-ai",
    )]))
}

/// GET /health
pub async fn health<T: HttpClient>(State(state): State<AppState<T>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "model": state.settings.model_name,
    }))
}
