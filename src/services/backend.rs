use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::BackendConfig;
use crate::core::state::GenerationRequest;
use crate::services::stream::{decode_sse, StreamEvent};

pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Supplies the bearer token attached to every backend call.
#[async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    async fn bearer_token(&self) -> Option<String>;
}

pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.is_some() { "<redacted>" } else { "<none>" };
        f.debug_tuple("StaticToken").field(&shown).finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Full result of the direct (non-streaming) endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RemoteStory {
    #[serde(alias = "storyText")]
    pub story_text: String,
    #[serde(default, alias = "audioUrl")]
    pub audio_url: String,
    #[serde(default)]
    pub frames: Vec<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub translation: Option<String>,
}

/// Multimedia fetched after a stream completed.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct StoryAssets {
    #[serde(default, alias = "audioUrl")]
    pub audio_url: String,
    #[serde(default)]
    pub frames: Vec<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub translation: Option<String>,
    /// Authoritative text, if the backend sends it along with the assets.
    #[serde(default, alias = "storyText")]
    pub story_text: Option<String>,
}

#[async_trait]
pub trait StoryBackend: Send + Sync + fmt::Debug {
    /// Succeeds on any 2xx from the health endpoint.
    async fn health(&self) -> Result<()>;
    async fn stream_story(&self, request_id: &str, request: &GenerationRequest) -> Result<EventStream>;
    async fn generate_story(&self, request_id: &str, request: &GenerationRequest) -> Result<RemoteStory>;
    async fn fetch_assets(&self, request_id: &str) -> Result<StoryAssets>;
}

#[derive(Serialize)]
struct StoryPayload<'a> {
    request_id: &'a str,
    #[serde(flatten)]
    request: &'a GenerationRequest,
}

#[derive(Debug)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    health_timeout: Duration,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.health_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
            health_timeout: config.health_timeout(),
            request_timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.bearer_token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = self
            .authorized(builder)
            .await
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Story API {} error ({}): {}", what, status, error_text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl StoryBackend for HttpBackend {
    async fn health(&self) -> Result<()> {
        let builder = self
            .client
            .get(self.url("/health"))
            .timeout(self.health_timeout);
        self.send(builder, "health").await?;
        Ok(())
    }

    async fn stream_story(&self, request_id: &str, request: &GenerationRequest) -> Result<EventStream> {
        debug!("Opening story stream {}", request_id);
        let builder = self
            .client
            .post(self.url("/api/v1/story/stream"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&StoryPayload { request_id, request });
        let resp = self.send(builder, "stream").await?;
        Ok(Box::pin(decode_sse(Box::pin(resp.bytes_stream()))))
    }

    async fn generate_story(&self, request_id: &str, request: &GenerationRequest) -> Result<RemoteStory> {
        debug!("Requesting story {} directly", request_id);
        let builder = self
            .client
            .post(self.url("/api/v1/story"))
            .timeout(self.request_timeout)
            .json(&StoryPayload { request_id, request });
        let resp = self.send(builder, "story").await?;
        resp.json::<RemoteStory>()
            .await
            .context("Failed to parse story response")
    }

    async fn fetch_assets(&self, request_id: &str) -> Result<StoryAssets> {
        let builder = self
            .client
            .get(self.url(&format!("/api/v1/story/{}/assets", request_id)))
            .timeout(self.request_timeout);
        let resp = self.send(builder, "assets").await?;
        resp.json::<StoryAssets>()
            .await
            .context("Failed to parse asset response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::test_config;
    use crate::core::state::{Profile, Voice};
    use futures_util::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn sample_request() -> GenerationRequest {
        GenerationRequest {
            prompt: "lanterns".into(),
            theme: "Study Grove".into(),
            target_length: 1210,
            num_scenes: 3,
            voice: Voice::Narrator,
            profile: Profile::default(),
            primary_language: "en".into(),
            secondary_language: Some("es".into()),
            child_profile_id: None,
            child_age: None,
        }
    }

    #[test]
    fn test_payload_flattens_request() {
        let request = sample_request();
        let json = serde_json::to_value(StoryPayload {
            request_id: "req-1",
            request: &request,
        })
        .unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["prompt"], "lanterns");
        assert_eq!(json["secondary_language"], "es");
    }

    #[test]
    fn test_remote_story_accepts_camel_case() {
        let json = r#"{
            "storyText": "Once upon a time.",
            "audioUrl": "https://cdn.example.com/a.mp3",
            "frames": ["f1.png", "f2.png"],
            "sessionId": "abc"
        }"#;
        let story: RemoteStory = serde_json::from_str(json).unwrap();
        assert_eq!(story.story_text, "Once upon a time.");
        assert_eq!(story.frames.len(), 2);
        assert_eq!(story.session_id.as_deref(), Some("abc"));
        assert!(story.translation.is_none());
    }

    #[test]
    fn test_assets_all_optional() {
        let assets: StoryAssets = serde_json::from_str("{}").unwrap();
        assert!(assets.audio_url.is_empty());
        assert!(assets.frames.is_empty());
        assert!(assets.story_text.is_none());
    }

    #[test]
    fn test_static_token_debug_redacts() {
        let shown = format!("{:?}", StaticToken::new(Some("secret".into())));
        assert!(!shown.contains("secret"));
        assert!(StaticToken::new(Some("  ".into())).0.is_none());
    }

    #[tokio::test]
    async fn test_health_fails_when_nothing_listens() {
        // bind then drop to get a port nobody is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = test_config(&format!("http://127.0.0.1:{}/", port));
        let backend = HttpBackend::new(&config.backend, Arc::new(StaticToken::new(None))).unwrap();
        assert_eq!(backend.url("/health"), format!("http://127.0.0.1:{}/health", port));
        assert!(backend.health().await.is_err());
    }

    /// Reads one HTTP/1.1 request and returns its head (lowercased) and body.
    async fn read_request(socket: &mut TcpStream) -> (String, String) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed mid-body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8_lossy(&buf[head_end..head_end + length]).to_string();
        (head, body)
    }

    /// Minimal story server: answers each connection by path and reports
    /// every request it saw.
    async fn spawn_story_server() -> (String, tokio::sync::mpsc::UnboundedReceiver<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let (head, body) = read_request(&mut socket).await;
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let (content_type, payload) = if request_line.starts_with("get /health ") {
                    ("text/plain", "ok".to_string())
                } else if request_line.starts_with("post /api/v1/story/stream ") {
                    (
                        "text/event-stream",
                        concat!(
                            ": keep-alive\n\n",
                            "data: {\"type\":\"start\"}\n\n",
                            "data: {\"type\":\"text\",\"delta\":\"Once \"}\n\n",
                            "data: {\"type\":\"text\",\"delta\":\"upon\"}\n\n",
                            "data: {\"type\":\"done\"}\n\n",
                        )
                        .to_string(),
                    )
                } else if request_line.starts_with("get /api/v1/story/req-1/assets ") {
                    (
                        "application/json",
                        r#"{"audioUrl":"https://cdn.example.com/a.mp3","frames":["f1","f2"]}"#.to_string(),
                    )
                } else {
                    ("text/plain", String::new())
                };
                let status = if payload.is_empty() { "404 Not Found" } else { "200 OK" };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    content_type,
                    payload.len(),
                    payload
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
                if tx.send((head, body)).is_err() {
                    break;
                }
            }
        });
        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_http_backend_against_stub_server() {
        let (url, mut seen) = spawn_story_server().await;
        let config = test_config(&url);
        let backend =
            HttpBackend::new(&config.backend, Arc::new(StaticToken::new(Some("tok".into())))).unwrap();

        backend.health().await.unwrap();
        let (head, _) = seen.recv().await.unwrap();
        assert!(head.starts_with("get /health http/1.1\r\n"));
        assert!(head.contains("authorization: bearer tok\r\n"));

        let events: Vec<StreamEvent> = backend
            .stream_story("req-1", &sample_request())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Start { message: None },
                StreamEvent::TextDelta { delta: "Once ".into() },
                StreamEvent::TextDelta { delta: "upon".into() },
                StreamEvent::Done { message: None },
            ]
        );
        let (head, body) = seen.recv().await.unwrap();
        assert!(head.starts_with("post /api/v1/story/stream http/1.1\r\n"));
        assert!(head.contains("authorization: bearer tok\r\n"));
        assert!(head.contains("accept: text/event-stream\r\n"));
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["request_id"], "req-1");
        assert_eq!(body["target_length"], 1210);

        let assets = backend.fetch_assets("req-1").await.unwrap();
        assert_eq!(assets.audio_url, "https://cdn.example.com/a.mp3");
        assert_eq!(assets.frames, vec!["f1", "f2"]);
        let (head, _) = seen.recv().await.unwrap();
        assert!(head.starts_with("get /api/v1/story/req-1/assets http/1.1\r\n"));
        assert!(head.contains("authorization: bearer tok\r\n"));
    }

    #[tokio::test]
    async fn test_http_backend_reports_status_errors() {
        let (url, _seen) = spawn_story_server().await;
        let config = test_config(&url);
        let backend = HttpBackend::new(&config.backend, Arc::new(StaticToken::new(None))).unwrap();

        let err = backend.fetch_assets("other").await.unwrap_err();
        assert!(err.to_string().contains("404"), "{}", err);
    }
}
