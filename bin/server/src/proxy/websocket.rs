//! Websocket relay.
//!
//! The backend connection is opened first so an unreachable backend is
//! reported as 502 before the client upgrade completes. Frames are then
//! copied in both directions until either side closes.

use axum::{
    extract::{
        FromRequestParts, Request,
        ws::{self, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::{self, client::IntoClientRequest, protocol::frame::coding::CloseCode},
};
use url::Url;

use super::backend_url;
use crate::error::ProxyError;

/// Request headers passed through to the backend handshake.
const RELAYED_HEADERS: [header::HeaderName; 4] = [
    header::AUTHORIZATION,
    header::COOKIE,
    header::ORIGIN,
    header::SEC_WEBSOCKET_PROTOCOL,
];

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Returns true for a websocket upgrade request.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Maps an HTTP(S) backend base URL to its websocket equivalent.
pub(crate) fn websocket_url(backend: &Url, path: &str, query: Option<&str>) -> Url {
    let mut target = backend_url(backend, path, query);
    let scheme = if backend.scheme() == "https" { "wss" } else { "ws" };
    // http(s) -> ws(s) is always an allowed scheme change
    let _ = target.set_scheme(scheme);
    target
}

/// Builds the TLS connector for `wss://` backends.
///
/// `None` leaves tokio-tungstenite's verifying default in place. With
/// `insecure_skip_verify` the backend certificate is accepted unchecked, but
/// handshake signatures are still verified against the presented key.
///
/// # Errors
///
/// Returns an error if the crypto provider supports no safe protocol version.
pub fn tls_connector(insecure_skip_verify: bool) -> Result<Option<Connector>, rustls::Error> {
    if !insecure_skip_verify {
        return Ok(None);
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();
    Ok(Some(Connector::Rustls(Arc::new(config))))
}

#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Connects to the backend and upgrades the client connection.
pub async fn relay(
    request: Request,
    backend: &Url,
    host: &str,
    connector: Option<Connector>,
) -> Result<Response, ProxyError> {
    let (mut parts, _body) = request.into_parts();
    let target = websocket_url(backend, parts.uri.path(), parts.uri.query());

    let mut backend_request =
        target
            .as_str()
            .into_client_request()
            .map_err(|e| ProxyError::Backend {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
    for name in RELAYED_HEADERS {
        for value in parts.headers.get_all(&name) {
            backend_request
                .headers_mut()
                .append(name.clone(), value.clone());
        }
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let (backend_socket, handshake) =
        connect_async_tls_with_config(backend_request, None, false, connector)
            .await
            .map_err(|e| ProxyError::Backend {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

    let upgrade = match handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(protocol) => upgrade.protocols([protocol.to_string()]),
        None => upgrade,
    };

    let host = host.to_string();
    Ok(upgrade.on_upgrade(move |client| async move {
        pump(client, backend_socket).await;
        tracing::debug!(host = %host, "websocket relay closed");
    }))
}

async fn pump(client: WebSocket, backend: BackendSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, ws::Message::Close(_));
            if backend_tx.send(to_backend(message)).await.is_err() || closing {
                break;
            }
        }
    };

    let downstream = async {
        while let Some(Ok(message)) = backend_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, ws::Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    };

    tokio::select! {
        () = upstream => {}
        () = downstream => {}
    }
}

fn to_backend(message: ws::Message) -> tungstenite::Message {
    match message {
        ws::Message::Text(text) => tungstenite::Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => {
            tungstenite::Message::Close(frame.map(|f| tungstenite::protocol::CloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().into(),
            }))
        }
    }
}

fn to_client(message: tungstenite::Message) -> Option<ws::Message> {
    Some(match message {
        tungstenite::Message::Text(text) => ws::Message::Text(text.as_str().into()),
        tungstenite::Message::Binary(data) => ws::Message::Binary(data),
        tungstenite::Message::Ping(data) => ws::Message::Ping(data),
        tungstenite::Message::Pong(data) => ws::Message::Pong(data),
        tungstenite::Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().into(),
        })),
        // raw frames never surface from a read
        tungstenite::Message::Frame(_) => return None,
    })
}
