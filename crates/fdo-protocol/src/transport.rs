//! HTTP transport for FDO messages.
//!
//! Every message is a `POST {base}/fdo/101/msg/{cmd}` with a CBOR body. The
//! first message of a flow returns `Authorization: Bearer <token>`, which the
//! client echoes on later requests. The reply type comes back in the
//! `Message-Type` header; 255 means the body is an [`ErrorMessage`].

use crate::cmd::Cmd;
use crate::error::{ErrorMessage, ProtocolError, ProtocolResult};
use fdo_cbor::CborCodec;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, instrument};

/// Media type of every FDO body.
pub const CONTENT_TYPE_CBOR: &str = "application/cbor";

/// Response header carrying the reply message number.
pub const MESSAGE_TYPE_HEADER: &str = "message-type";

/// URL path for a message.
#[must_use]
pub fn message_path(cmd: Cmd) -> String {
    format!("/fdo/101/msg/{}", cmd.number())
}

/// Strip the `Bearer ` prefix from an `Authorization` value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("fdo-conformance/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One HTTP exchange as seen by the client.
#[derive(Debug, Clone)]
pub struct FdoResponse {
    pub status: u16,
    /// Parsed `Message-Type` header.
    pub msg_type: Option<u8>,
    /// Bearer token from the `Authorization` response header.
    pub token: Option<String>,
    pub body: Vec<u8>,
}

impl FdoResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 200 && self.msg_type != Some(Cmd::Error.number())
    }

    /// The FDO error message, if this is an error reply that decodes as one.
    #[must_use]
    pub fn error_message(&self) -> Option<ErrorMessage> {
        if self.is_success() {
            return None;
        }
        ErrorMessage::from_bytes(&self.body).ok()
    }

    /// Body of a successful `reply`, or the peer's error.
    ///
    /// # Errors
    /// [`ProtocolError::Remote`] for FDO error replies,
    /// [`ProtocolError::Transport`] for other non-success statuses and
    /// [`ProtocolError::Decode`] when the reply type is wrong.
    pub fn expect(self, reply: Cmd) -> ProtocolResult<Vec<u8>> {
        if !self.is_success() {
            return Err(match self.error_message() {
                Some(message) => ProtocolError::Remote {
                    status: self.status,
                    message,
                },
                None => ProtocolError::Transport(format!(
                    "HTTP {} without an FDO error body",
                    self.status
                )),
            });
        }
        match self.msg_type {
            Some(n) if n != reply.number() => Err(ProtocolError::Decode(format!(
                "expected message {reply}, got {n}"
            ))),
            _ => Ok(self.body),
        }
    }
}

/// FDO HTTP client bound to one target.
#[derive(Debug, Clone)]
pub struct FdoClient {
    base_url: String,
    http: reqwest::Client,
}

impl FdoClient {
    /// # Errors
    /// Returns [`ProtocolError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, config: &ClientConfig) -> ProtocolResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_CBOR));
        if let Ok(agent) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Post raw bytes as message `cmd`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Transport`] when the request cannot be sent
    /// or the response body cannot be read. HTTP error statuses are not errors
    /// here; see [`FdoResponse::expect`].
    #[instrument(skip(self, body, token), fields(cmd = %cmd, len = body.len()))]
    pub async fn send(
        &self,
        cmd: Cmd,
        body: Vec<u8>,
        token: Option<&str>,
    ) -> ProtocolResult<FdoResponse> {
        let url = format!("{}{}", self.base_url, message_path(cmd));
        let mut request = self.http.post(&url).body(body);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let msg_type = headers
            .get(MESSAGE_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?
            .to_vec();

        debug!(status, ?msg_type, len = body.len(), "response received");
        Ok(FdoResponse {
            status,
            msg_type,
            token,
            body,
        })
    }
}
