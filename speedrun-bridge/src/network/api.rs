//! Match Service REST API
//!
//! Version check, login, registration and queue membership. Calls return
//! boxed futures so the controller can spawn them without awaiting.

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::core::version::deserialize_version;

/// REST errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 403, the player may not do this (banned from the queue).
    #[error("forbidden")]
    Forbidden,
    /// Any other non-success status.
    #[error("server returned {code}: {message}")]
    Status {
        /// HTTP status.
        code: u16,
        /// `error` field of the body, or the raw body.
        message: String,
    },
    /// Connection, timeout or TLS failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Body was not the expected JSON.
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Message suitable for presentation.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result of `GET /version`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ServerVersion {
    /// Version the service expects from bridge and game mod.
    #[serde(default, deserialize_with = "deserialize_version")]
    pub version: f64,
    /// Where to fetch a matching bridge.
    #[serde(default)]
    pub bridge_download_url: String,
    /// Where to fetch a matching game mod.
    #[serde(default)]
    pub game_mod_download_url: String,
}

/// Player data returned by login and registration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerProfile {
    /// Display name.
    pub player_name: String,
    /// Account does not exist yet.
    pub new_player: bool,
    /// Full response body.
    pub data: Value,
}

impl PlayerProfile {
    /// Extract the known fields, keeping the raw body.
    pub fn from_value(data: Value) -> Self {
        Self {
            player_name: data
                .get("player_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            new_player: data.get("new_player").and_then(Value::as_bool).unwrap_or(false),
            data,
        }
    }
}

/// Future returned by every API call.
pub type ApiFuture<T> = BoxFuture<'static, Result<T, ApiError>>;

/// Request/response calls to the match service.
pub trait MatchApi: Send + Sync {
    /// `GET /version`.
    fn server_version(&self) -> ApiFuture<ServerVersion>;
    /// `POST /auth/login`.
    fn login(&self, player_id: &str) -> ApiFuture<PlayerProfile>;
    /// `POST /auth/register`.
    fn register(&self, player_id: &str, player_name: &str) -> ApiFuture<PlayerProfile>;
    /// `POST /queue/join`. Fails with [`ApiError::Forbidden`] when banned.
    fn queue_join(&self, player_id: &str) -> ApiFuture<()>;
    /// `POST /queue/leave`.
    fn queue_leave(&self, player_id: &str) -> ApiFuture<()>;
}

/// Map an HTTP status and body to success or an [`ApiError`].
pub fn check_status(code: u16, body: &str) -> Result<(), ApiError> {
    match code {
        200..=299 => Ok(()),
        403 => Err(ApiError::Forbidden),
        _ => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.trim().to_string());
            Err(ApiError::Status { code, message })
        }
    }
}

/// reqwest-backed [`MatchApi`].
#[derive(Debug, Clone)]
pub struct HttpMatchApi {
    client: Client,
    base_url: String,
}

impl HttpMatchApi {
    /// Client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post(&self, path: &str, body: Value) -> RequestBuilder {
        self.client.post(self.url(path)).json(&body)
    }
}

async fn send_json(request: RequestBuilder) -> Result<Value, ApiError> {
    let response = request.send().await?;
    let code = response.status().as_u16();
    let body = response.text().await?;
    check_status(code, &body)?;

    if body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(&body)?)
    }
}

impl MatchApi for HttpMatchApi {
    fn server_version(&self) -> ApiFuture<ServerVersion> {
        let request = self.client.get(self.url("/version"));
        async move { Ok(serde_json::from_value(send_json(request).await?)?) }.boxed()
    }

    fn login(&self, player_id: &str) -> ApiFuture<PlayerProfile> {
        let request = self.post("/auth/login", json!({ "steam_id": player_id }));
        async move { Ok(PlayerProfile::from_value(send_json(request).await?)) }.boxed()
    }

    fn register(&self, player_id: &str, player_name: &str) -> ApiFuture<PlayerProfile> {
        let request = self.post(
            "/auth/register",
            json!({ "steam_id": player_id, "player_name": player_name }),
        );
        async move { Ok(PlayerProfile::from_value(send_json(request).await?)) }.boxed()
    }

    fn queue_join(&self, player_id: &str) -> ApiFuture<()> {
        let request = self.post("/queue/join", json!({ "steam_id": player_id }));
        async move { send_json(request).await.map(|_| ()) }.boxed()
    }

    fn queue_leave(&self, player_id: &str) -> ApiFuture<()> {
        let request = self.post("/queue/leave", json!({ "steam_id": player_id }));
        async move { send_json(request).await.map(|_| ()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the request head.
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (base, task)
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(200, "{}").is_ok());
        assert!(matches!(check_status(403, ""), Err(ApiError::Forbidden)));

        match check_status(400, r#"{"error":"Name already taken"}"#) {
            Err(ApiError::Status { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "Name already taken");
            }
            other => panic!("unexpected: {other:?}"),
        }

        match check_status(502, "Bad Gateway\n") {
            Err(e @ ApiError::Status { .. }) => assert_eq!(e.user_message(), "Bad Gateway"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_server_version_accepts_string_version() {
        let version: ServerVersion = serde_json::from_value(json!({
            "version": "1.02",
            "bridge_download_url": "https://dl/bridge"
        }))
        .unwrap();
        assert!((version.version - 1.02).abs() < 1e-9);
        assert_eq!(version.bridge_download_url, "https://dl/bridge");
        assert_eq!(version.game_mod_download_url, "");
    }

    #[test]
    fn test_player_profile_fields() {
        let profile = PlayerProfile::from_value(json!({"player_name": "runner", "elo": 1200}));
        assert_eq!(profile.player_name, "runner");
        assert!(!profile.new_player);
        assert_eq!(profile.data["elo"], 1200);

        let fresh = PlayerProfile::from_value(json!({"new_player": true}));
        assert!(fresh.new_player);
    }

    #[tokio::test]
    async fn test_http_version_call() {
        let (base, server) = serve_once("200 OK", r#"{"version":1.02,"game_mod_download_url":"g"}"#).await;
        let api = HttpMatchApi::new(&base, Duration::from_secs(5)).unwrap();

        let version = api.server_version().await.unwrap();
        assert!((version.version - 1.02).abs() < 1e-9);
        assert_eq!(version.game_mod_download_url, "g");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /version "));
    }

    #[tokio::test]
    async fn test_http_queue_join_forbidden() {
        let (base, server) = serve_once("403 Forbidden", "").await;
        let api = HttpMatchApi::new(&base, Duration::from_secs(5)).unwrap();

        let err = api.queue_join("7656").await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /queue/join "));
        assert!(request.contains(r#"{"steam_id":"7656"}"#));
    }
}
