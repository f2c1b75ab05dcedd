//! Session ownership: one client WebSocket, one upstream WebSocket, and the
//! two forwarders pumping events between them.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use anyhow::Context as _;
use axum::extract::ws::{CloseFrame, Message as ClientMessage, WebSocket, close_code};
use config::Config;
use futures::{
    SinkExt as _, StreamExt as _,
    stream::{SplitSink, SplitStream},
};
use http::{HeaderValue, header::AUTHORIZATION};
use secrecy::ExposeSecret as _;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message as UpstreamMessage, client::IntoClientRequest as _, error::ProtocolError},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    auth::{Credential, TokenProvider},
    error::SessionError,
    events::SessionSettings,
    processor::{ClientKind, Delivery, InboundProcessor, OutboundProcessor},
    tool::ToolRegistry,
};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The realtime middle tier. One instance serves every connection; all
/// per-session state lives inside [`MiddleTier::serve`].
pub struct MiddleTier {
    endpoint: Url,
    deployment: String,
    api_version: String,
    connect_timeout: Duration,
    credential: Credential,
    instructions: Option<String>,
    temperature: Option<f64>,
    max_response_output_tokens: Option<u32>,
    disable_audio: Option<bool>,
    voice: RwLock<String>,
    tools: Arc<ToolRegistry>,
}

impl MiddleTier {
    /// Builds the middle tier from configuration. When the upstream uses
    /// bearer authentication, the credential is warmed here so the first
    /// session does not pay the token-fetch latency.
    pub async fn new(config: &Config, instructions: Option<String>, tools: ToolRegistry) -> anyhow::Result<Self> {
        let upstream = &config.upstream;

        let endpoint = upstream.endpoint.clone().context("upstream endpoint is not configured")?;

        let deployment = upstream
            .deployment
            .clone()
            .context("upstream deployment is not configured")?;

        let credential = match (&upstream.api_key, &upstream.entra) {
            (Some(key), _) => Credential::Key(key.clone()),
            (None, Some(entra)) => {
                let provider = TokenProvider::new(entra);

                provider
                    .warm()
                    .await
                    .context("failed to mint the initial upstream bearer token")?;

                Credential::Bearer(provider)
            }
            (None, None) => anyhow::bail!("upstream requires either an api_key or entra credentials"),
        };

        Ok(Self {
            endpoint,
            deployment,
            api_version: upstream.api_version.clone(),
            connect_timeout: upstream.connect_timeout,
            credential,
            instructions,
            temperature: config.session.temperature,
            max_response_output_tokens: config.session.max_tokens,
            disable_audio: config.session.disable_audio,
            voice: RwLock::new(config.session.voice.clone()),
            tools: Arc::new(tools),
        })
    }

    /// Sets the voice used by sessions accepted after this call. Running
    /// sessions keep the snapshot they started with.
    pub fn set_voice(&self, voice: String) {
        log::info!("voice for new sessions set to '{voice}'");
        *self.voice.write().unwrap_or_else(PoisonError::into_inner) = voice;
    }

    fn voice(&self) -> String {
        self.voice.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn settings(&self) -> SessionSettings {
        SessionSettings {
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            max_response_output_tokens: self.max_response_output_tokens,
            disable_audio: self.disable_audio,
            voice: self.voice(),
            tool_choice: self.tools.tool_choice(),
            tools: self.tools.schemas(),
        }
    }

    fn upstream_url(&self) -> Result<Url, SessionError> {
        let mut url = self.endpoint.clone();

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(SessionError::Handshake(format!("unsupported upstream scheme '{other}'")));
            }
        };

        url.set_scheme(scheme)
            .map_err(|()| SessionError::Handshake(format!("cannot use '{scheme}' on the upstream endpoint")))?;

        url.set_path("/openai/realtime");

        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version)
            .append_pair("deployment", &self.deployment);

        Ok(url)
    }

    async fn connect(&self, request_id: Option<HeaderValue>) -> Result<UpstreamSocket, SessionError> {
        let url = self.upstream_url()?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| SessionError::Handshake(err.to_string()))?;

        match &self.credential {
            Credential::Key(key) => {
                let value = HeaderValue::from_str(key.expose_secret())
                    .map_err(|_| SessionError::Handshake("upstream api key is not a valid header value".into()))?;

                request.headers_mut().insert("api-key", value);
            }
            Credential::Bearer(provider) => {
                let token = provider
                    .bearer()
                    .await
                    .map_err(|err| SessionError::Handshake(err.to_string()))?;

                let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .map_err(|_| SessionError::Handshake("upstream bearer token is not a valid header value".into()))?;

                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }

        if let Some(request_id) = request_id {
            request.headers_mut().insert("x-ms-client-request-id", request_id);
        }

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| SessionError::Handshake("upstream connection timed out".into()))?
            .map_err(|err| SessionError::Handshake(err.to_string()))?;

        Ok(socket)
    }

    /// Runs one session to completion: connects upstream, pumps events in
    /// both directions, and tears everything down when either side closes.
    pub async fn serve(self: Arc<Self>, mut client: WebSocket, kind: ClientKind, request_id: Option<HeaderValue>) {
        let upstream = match self.connect(request_id).await {
            Ok(upstream) => upstream,
            Err(err) => {
                log::error!("{err}");

                let close = CloseFrame {
                    code: close_code::ERROR,
                    reason: "upstream connection failed".into(),
                };

                let _ = client.send(ClientMessage::Close(Some(close))).await;
                return;
            }
        };

        log::debug!("session established ({kind:?})");

        let inbound = InboundProcessor::new(Arc::new(self.settings()), kind);
        let outbound = OutboundProcessor::new(self.tools.clone(), kind);

        let (client_sink, client_stream) = client.split();
        let (upstream_sink, upstream_stream) = upstream.split();

        // Both forwarders write upstream; a single writer task owns the sink
        // and preserves the emission order.
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(write_upstream(upstream_sink, upstream_rx));

        let to_upstream = tokio::spawn(client_to_upstream(
            client_stream,
            inbound,
            upstream_tx.clone(),
            cancel.clone(),
        ));

        let to_client = tokio::spawn(upstream_to_client(
            upstream_stream,
            outbound,
            upstream_tx,
            client_sink,
            cancel,
        ));

        let _ = tokio::join!(to_upstream, to_client);
        let _ = writer.await;

        log::debug!("session closed");
    }
}

async fn client_to_upstream(
    mut client: SplitStream<WebSocket>,
    processor: InboundProcessor,
    upstream: mpsc::UnboundedSender<UpstreamMessage>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            frame = client.next() => frame,
            _ = cancel.cancelled() => break,
        };

        match frame {
            Some(Ok(ClientMessage::Text(text))) => {
                if let Some(outgoing) = processor.process(text.as_str())
                    && upstream.send(UpstreamMessage::Text(outgoing)).is_err()
                {
                    break;
                }
            }
            Some(Ok(ClientMessage::Close(_))) | None => {
                log::debug!("client socket closed");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                // axum surfaces client resets here; either way the session
                // is over.
                log::debug!("client socket error: {err}");
                break;
            }
        }
    }

    cancel.cancel();
}

async fn upstream_to_client(
    mut upstream: SplitStream<UpstreamSocket>,
    mut processor: OutboundProcessor,
    upstream_tx: mpsc::UnboundedSender<UpstreamMessage>,
    mut client: SplitSink<WebSocket, ClientMessage>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            frame = upstream.next() => frame,
            _ = cancel.cancelled() => break,
        };

        match frame {
            Some(Ok(UpstreamMessage::Text(text))) => match processor.process(&text).await {
                Ok(deliveries) => {
                    if deliver(deliveries, &upstream_tx, &mut client).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::error!("terminating session: {err}");
                    break;
                }
            },
            Some(Ok(UpstreamMessage::Close(_))) | None => {
                log::debug!("upstream socket closed");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) if is_clean_disconnect(&err) => {
                log::debug!("upstream connection reset");
                break;
            }
            Some(Err(err)) => {
                log::warn!("upstream socket error: {err}");
                break;
            }
        }
    }

    cancel.cancel();
}

async fn deliver(
    deliveries: Vec<Delivery>,
    upstream: &mpsc::UnboundedSender<UpstreamMessage>,
    client: &mut SplitSink<WebSocket, ClientMessage>,
) -> Result<(), SessionError> {
    for delivery in deliveries {
        match delivery {
            Delivery::Upstream(frame) => {
                if upstream.send(UpstreamMessage::Text(frame)).is_err() {
                    return Err(SessionError::UpstreamClosed);
                }
            }
            Delivery::Client(frame) => client.send(ClientMessage::Text(frame.into())).await?,
        }
    }

    Ok(())
}

async fn write_upstream(
    mut sink: SplitSink<UpstreamSocket, UpstreamMessage>,
    mut messages: mpsc::UnboundedReceiver<UpstreamMessage>,
) {
    while let Some(message) = messages.recv().await {
        if let Err(err) = sink.send(message).await {
            if !is_clean_disconnect(&err) {
                log::warn!("upstream send failed: {err}");
            }

            break;
        }
    }

    let _ = sink.close().await;
}

/// Reset-by-peer and close-after-close are clean terminations, not errors.
fn is_clean_disconnect(error: &tungstenite::Error) -> bool {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(err) => matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}
