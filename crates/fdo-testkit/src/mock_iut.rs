//! Mock implementation under test.
//!
//! Wraps wiremock with the FDO conventions: every message is a POST to
//! `/fdo/101/msg/{n}`, replies carry `message-type`, and rejections carry an
//! FDO error message with type 255.

use fdo_cbor::CborCodec;
use fdo_protocol::transport::{CONTENT_TYPE_CBOR, MESSAGE_TYPE_HEADER, message_path};
use fdo_protocol::{Cmd, ErrorMessage, FdoErrorCode};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A scripted FDO peer.
pub struct MockIut {
    server: MockServer,
}

impl MockIut {
    /// Start a new mock server.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to hand to an `FdoClient`.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// The underlying wiremock server for advanced configuration.
    #[must_use]
    pub const fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Answer every `request` with `reply` carrying `body`, plus a bearer
    /// token when one is given.
    pub async fn reply(&self, request: Cmd, reply: Cmd, body: Vec<u8>, token: Option<&str>) {
        let mut response = ResponseTemplate::new(200)
            .insert_header("content-type", CONTENT_TYPE_CBOR)
            .insert_header(MESSAGE_TYPE_HEADER, reply.number().to_string().as_str())
            .set_body_bytes(body);
        if let Some(token) = token {
            response = response.insert_header("authorization", format!("Bearer {token}").as_str());
        }
        Mock::given(method("POST"))
            .and(path(message_path(request)))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Reject every `request` with an FDO error message.
    pub async fn reject(&self, request: Cmd, status: u16, code: FdoErrorCode) {
        let message = ErrorMessage::new(code, request, format!("{code} from mock"));
        let body = message.to_bytes().unwrap_or_default();
        Mock::given(method("POST"))
            .and(path(message_path(request)))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", CONTENT_TYPE_CBOR)
                    .insert_header(MESSAGE_TYPE_HEADER, "255")
                    .set_body_bytes(body),
            )
            .mount(&self.server)
            .await;
    }

    /// Bodies received for `request`, oldest first.
    pub async fn received(&self, request: Cmd) -> Vec<Vec<u8>> {
        let wanted = message_path(request);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == wanted)
            .map(|r| r.body)
            .collect()
    }
}
