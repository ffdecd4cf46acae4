//! Upstream dispatch to Z.AI's chat endpoint.
//!
//! Z.AI authenticates with web-session cookies and expects the headers its
//! own web client sends; requests without them get rejected at the edge.
//! The response always arrives as an SSE byte stream regardless of what
//! the downstream caller asked for.

use crate::client::HttpClient;
use crate::cookies::CookiePool;
use crate::errors::ProxyError;
use crate::zai::ZaiChatRequest;
use axum::body::{Body, BodyDataStream};
use axum::http::{Request, StatusCode, Uri};
use tracing::{debug, error, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
const SEC_CH_UA: &str = r#""Not)A;Brand";v="8", "Chromium";v="138", "Google Chrome";v="138""#;
const FRONTEND_VERSION: &str = "prod-fe-1.0.53";
const ORIGIN: &str = "https://chat.z.ai";

/// POST a chat payload upstream and hand back the SSE byte stream.
///
/// Borrows a cookie from the pool for the call. A 401 marks the cookie
/// failed (session expired or banned); a transport error marks it failed
/// too, since a dead cookie and a dead route are indistinguishable here.
/// Any 2xx returns it to rotation.
pub async fn send_chat<T: HttpClient>(
    client: &T,
    pool: &CookiePool,
    url: &Uri,
    payload: &ZaiChatRequest,
) -> Result<BodyDataStream, ProxyError> {
    let cookie = pool.next_cookie().await.ok_or(ProxyError::NoCookies)?;

    let body = serde_json::to_vec(payload)
        .map_err(|e| ProxyError::UpstreamUnavailable(format!("payload serialization: {e}")))?;

    let req = build_request(url, &cookie, body)
        .map_err(|e| ProxyError::UpstreamUnavailable(format!("request construction: {e}")))?;

    debug!(url = %url, model = %payload.model, "Dispatching chat request upstream");

    let response = match client.request(req).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Upstream request failed");
            pool.mark_failed(&cookie).await;
            return Err(ProxyError::UpstreamUnavailable(e.to_string()));
        }
    };

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        warn!("Upstream rejected cookie with 401");
        pool.mark_failed(&cookie).await;
        return Err(ProxyError::Upstream {
            status,
            detail: "Upstream authentication failed".to_string(),
        });
    }
    if !status.is_success() {
        let detail = read_error_detail(response.into_body()).await;
        error!(status = %status, detail = %detail, "Upstream returned error status");
        return Err(ProxyError::Upstream { status, detail });
    }

    pool.mark_success(&cookie).await;
    Ok(response.into_body().into_data_stream())
}

/// Build the upstream POST with the Z.AI web client's header set.
fn build_request(
    url: &Uri,
    cookie: &str,
    body: Vec<u8>,
) -> Result<Request<Body>, axum::http::Error> {
    Request::builder()
        .method("POST")
        .uri(url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {cookie}"))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/json, text/event-stream")
        .header("Accept-Language", "zh-CN")
        .header("sec-ch-ua", SEC_CH_UA)
        .header("sec-ch-ua-mobile", "?0")
        .header("sec-ch-ua-platform", "\"macOS\"")
        .header("x-fe-version", FRONTEND_VERSION)
        .header("Origin", ORIGIN)
        .header("Referer", format!("{ORIGIN}/"))
        .body(Body::from(body))
}

/// Pull the `detail` field out of an upstream error body, falling back to
/// the raw text.
async fn read_error_detail(body: Body) -> String {
    let bytes = match axum::body::to_bytes(body, 64 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => return "<unreadable upstream error body>".to_string(),
    };
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes)
        && let Some(detail) = value.get("detail").and_then(|d| d.as_str())
    {
        return detail.to_string();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
