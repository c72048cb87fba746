//! HTTP front end for [`Listener`].

use super::Listener;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use fdo_cbor::CborCodec;
use fdo_protocol::transport::{CONTENT_TYPE_CBOR, MESSAGE_TYPE_HEADER, bearer_token};
use fdo_protocol::{Cmd, ErrorMessage, FdoErrorCode, ProtocolError};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Routes `POST /fdo/101/msg/{msg}` to the listener.
pub fn router(listener: Listener) -> Router {
    Router::new()
        .route(
            "/fdo/101/msg/{msg}",
            post(message).fallback(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(listener)
}

/// Serve until the socket fails.
///
/// # Errors
/// I/O errors from the accept loop.
pub async fn serve(tcp: tokio::net::TcpListener, listener: Listener) -> std::io::Result<()> {
    if let Ok(addr) = tcp.local_addr() {
        info!(%addr, "listener serving");
    }
    axum::serve(tcp, router(listener)).await
}

fn cbor(status: StatusCode, msg_type: u8, token: Option<&str>, body: Vec<u8>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_CBOR));
    headers.insert(MESSAGE_TYPE_HEADER, HeaderValue::from(u16::from(msg_type)));
    if let Some(value) = token.and_then(|t| HeaderValue::from_str(&format!("Bearer {t}")).ok()) {
        headers.insert(AUTHORIZATION, value);
    }
    (status, headers, body).into_response()
}

fn error_response(status: StatusCode, message: &ErrorMessage) -> Response {
    match message.to_bytes() {
        Ok(body) => cbor(status, Cmd::Error.number(), None, body),
        Err(err) => {
            warn!(error = %err, "error message did not encode");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn body_error(status: StatusCode, prev: Cmd, why: &str) -> Response {
    error_response(
        status,
        &ErrorMessage::new(FdoErrorCode::MessageBodyError, prev, why),
    )
}

async fn message(
    State(listener): State<Listener>,
    Path(msg): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(cmd) = msg.parse::<u8>().ok().and_then(Cmd::from_number) else {
        return body_error(StatusCode::BAD_REQUEST, Cmd::Error, "unknown message type");
    };

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim);
    if content_type != Some(CONTENT_TYPE_CBOR) {
        return body_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            cmd,
            "content type must be application/cbor",
        );
    }

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);

    match listener.handle(cmd, token, &body).await {
        Ok(reply) => cbor(
            StatusCode::OK,
            reply.cmd.number(),
            reply.token.as_deref(),
            reply.body,
        ),
        Err(err) => {
            log_rejection(cmd, &err);
            let status =
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, &err.to_error_message(cmd))
        }
    }
}

fn log_rejection(cmd: Cmd, err: &ProtocolError) {
    if err.http_status() >= 500 {
        warn!(%cmd, error = %err, "request failed");
    } else {
        info!(%cmd, error = %err, "request rejected");
    }
}

async fn method_not_allowed() -> Response {
    body_error(StatusCode::METHOD_NOT_ALLOWED, Cmd::Error, "only POST is accepted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerConfig;
    use crate::store::Stores;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use fdo_protocol::to0::{Hello, HelloAck};
    use fdo_store::{MemoryKvStore, MemoryStoreConfig};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let kv = Arc::new(MemoryKvStore::new(MemoryStoreConfig::default()));
        router(Listener::new(Stores::over(kv), ListenerConfig::default()))
    }

    fn post_cbor(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, CONTENT_TYPE_CBOR)
            .body(Body::from(body))
            .unwrap()
    }

    async fn error_of(response: Response) -> ErrorMessage {
        assert_eq!(response.headers()[MESSAGE_TYPE_HEADER], "255");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        ErrorMessage::from_bytes(&body).unwrap()
    }

    #[tokio::test]
    async fn hello_returns_ack_and_bearer() {
        let response = app()
            .oneshot(post_cbor("/fdo/101/msg/20", Hello.to_bytes().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[MESSAGE_TYPE_HEADER], "21");
        assert!(
            response.headers()[AUTHORIZATION]
                .to_str()
                .unwrap()
                .starts_with("Bearer ")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        HelloAck::from_bytes(&body).unwrap();
    }

    #[tokio::test]
    async fn wrong_content_type_is_415() {
        let request = Request::post("/fdo/101/msg/20")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let err = error_of(response).await;
        assert_eq!(err.error_code(), Some(FdoErrorCode::MessageBodyError));
    }

    #[tokio::test]
    async fn get_is_405() {
        let request = Request::get("/fdo/101/msg/20").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        error_of(response).await;
    }

    #[tokio::test]
    async fn unknown_message_number_is_a_body_error() {
        let response = app()
            .oneshot(post_cbor("/fdo/101/msg/99", vec![0x80]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_of(response).await.code, FdoErrorCode::MessageBodyError.code());
    }

    #[tokio::test]
    async fn missing_bearer_is_401_with_prev_msg_id() {
        let response = app()
            .oneshot(post_cbor("/fdo/101/msg/22", vec![0x80]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(response).await.prev_msg_id, 22);
    }
}
