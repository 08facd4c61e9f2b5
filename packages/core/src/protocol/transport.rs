// HTTP транспорт
// Трейт Transport отделяет конвейер от сети: в тестах его заменяет mock сервер.

use crate::config::Config;
use crate::error::{FgoError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Имена заголовков (в нижнем регистре, как их хранят WireRequest/WireResponse)
pub mod header {
    pub const SIGNATURE: &str = "x-signature";
    pub const TIMESTAMP: &str = "x-timestamp";
    pub const NONCE: &str = "x-nonce";
    pub const DEVICE_INFO: &str = "x-device-info";
    pub const USER_ID: &str = "x-user-id";
    pub const SESSION_TOKEN: &str = "x-session-token";
    pub const PROTECTED: &str = "x-protected";
    pub const UNITY_VERSION: &str = "x-unity-version";
    pub const SESSION_REFRESH: &str = "x-session-refresh";
    pub const USER_AGENT: &str = "user-agent";
    pub const CONTENT_TYPE: &str = "content-type";
}

pub const CONTENT_TYPE_MSGPACK: &str = "application/x-msgpack";

pub type Headers = BTreeMap<String, String>;

/// Подписанный запрос, готовый к отправке
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub url: String,
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_protected(&self) -> bool {
        self.header(header::PROTECTED) == Some("1")
    }

    pub fn refresh_requested(&self) -> bool {
        self.header(header::SESSION_REFRESH) == Some("1")
    }
}

/// Доставка запроса до сервера
///
/// Любая сетевая неудача (соединение, таймаут, обрыв) должна возвращаться
/// как `FgoError::Transport`: только она подлежит повтору.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse>;
}

/// Транспорт поверх reqwest (rustls)
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(Config::global().http_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        debug!(target: "fgo::transport", "POST {} ({} bytes)", request.path, request.body.len());

        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(request.body).send().await?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            let value = value.to_str().map_err(|_| {
                FgoError::ServerProtocol(format!("non-ASCII value in header {}", name))
            })?;
            headers.insert(name.as_str().to_string(), value.to_string());
        }
        let body = response.bytes().await?.to_vec();

        debug!(target: "fgo::transport", "{} -> HTTP {} ({} bytes)", request.path, status, body.len());
        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = WireResponse::new(200, Vec::new())
            .with_header("X-Protected", "1")
            .with_header("X-Session-Refresh", "1");
        assert!(response.is_protected());
        assert!(response.refresh_requested());
        assert_eq!(response.header("x-PROTECTED"), Some("1"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let transport = HttpTransport::new().unwrap();
        let request = WireRequest {
            url: "http://127.0.0.1:9/home/top".to_string(),
            path: "/home/top".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        };
        let err = transport.send(request).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
