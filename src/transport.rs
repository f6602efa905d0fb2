// HTTP port shared by the dispatcher, the archiver and the operator console.

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::error::TransportError;

pub const REQUEST_ID_HEADER: &str = "x-gw-request-id";

/// What came back from the wire, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub request_id: Option<String>,
    pub content_type: String,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type.contains("application/json")
    }
}

pub trait Transport: Send + Sync {
    /// POST `body` as JSON with a bearer token.
    fn post_json(&self, url: &str, token: &str, body: &Value) -> Result<HttpReply, TransportError>;
}

/// `{base}{path}`, dropping one trailing slash from `base`.
pub fn endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.strip_suffix('/').unwrap_or(base_url);
    format!("{}{}", base, path)
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, token: &str, body: &Value) -> Result<HttpReply, TransportError> {
        tracing::debug!(url, "POST");
        let response = self.client.post(url).bearer_auth(token).json(body).send()?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text()?;

        tracing::debug!(url, status, request_id = request_id.as_deref(), "reply");
        Ok(HttpReply { status, request_id, content_type, body })
    }
}
