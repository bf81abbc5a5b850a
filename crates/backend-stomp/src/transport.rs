//! Socket transport seam and the WebSocket implementation.

use async_trait::async_trait;
use backend_core::{BackendError, BackendErrorCategory};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

const LINK_BUFFER: usize = 64;

/// What the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// The socket is gone. No further events follow.
    Closed { reason: Option<String> },
}

/// An open socket. Dropping `outbound` closes it.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// In-memory link pair: the first half goes to the session, the second
    /// half plays the server.
    pub fn pair() -> (Self, RemoteEnd) {
        let (outbound, from_client) = mpsc::channel(LINK_BUFFER);
        let (to_client, inbound) = mpsc::channel(LINK_BUFFER);
        (
            Self { outbound, inbound },
            RemoteEnd {
                from_client,
                to_client,
            },
        )
    }
}

/// Server side of an in-memory link.
#[derive(Debug)]
pub struct RemoteEnd {
    pub from_client: mpsc::Receiver<String>,
    pub to_client: mpsc::Sender<TransportEvent>,
}

/// Opens socket transports to the chat endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<TransportLink, BackendError>;
}

/// WebSocket connector for the SockJS endpoint's raw-WebSocket route.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// `http(s)://host/api/connect` becomes `ws(s)://host/api/connect/websocket`.
    pub fn for_sockjs_endpoint(connect_url: &Url) -> Result<Self, BackendError> {
        let scheme = match connect_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(BackendError::new(
                    BackendErrorCategory::Config,
                    "invalid_url",
                    format!("unsupported connect scheme '{other}'"),
                ));
            }
        };
        let mut url = connect_url.clone();
        url.set_scheme(scheme).map_err(|_| {
            BackendError::new(
                BackendErrorCategory::Config,
                "invalid_url",
                format!("cannot switch '{connect_url}' to {scheme}"),
            )
        })?;
        let path = format!("{}/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<TransportLink, BackendError> {
        let (socket, _response) = connect_async(self.url.as_str()).await.map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Network,
                "transport_error",
                format!("websocket connect failed: {err}"),
            )
        })?;
        debug!(url = %self.url, "websocket open");

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(LINK_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %err, "websocket write failed");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx
                            .send(TransportEvent::Text(text.as_str().to_owned()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|frame| frame.reason.to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            };
            let _ = inbound_tx.send(TransportEvent::Closed { reason }).await;
        });

        Ok(TransportLink { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_sockjs_endpoint_to_raw_websocket() {
        let http = Url::parse("http://localhost:8080/api/connect").expect("url");
        assert_eq!(
            WebSocketConnector::for_sockjs_endpoint(&http)
                .expect("connector")
                .url()
                .as_str(),
            "ws://localhost:8080/api/connect/websocket"
        );

        let https = Url::parse("https://chat.example.com/v1/api/connect/").expect("url");
        assert_eq!(
            WebSocketConnector::for_sockjs_endpoint(&https)
                .expect("connector")
                .url()
                .as_str(),
            "wss://chat.example.com/v1/api/connect/websocket"
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        let ftp = Url::parse("ftp://example.com/api/connect").expect("url");
        let err = WebSocketConnector::for_sockjs_endpoint(&ftp).expect_err("ftp is not a socket");
        assert_eq!(err.code, "invalid_url");
    }

    #[tokio::test]
    async fn in_memory_pair_is_wired_both_ways() {
        let (mut link, mut remote) = TransportLink::pair();
        link.outbound.send("ping".into()).await.expect("send");
        assert_eq!(remote.from_client.recv().await.as_deref(), Some("ping"));

        remote
            .to_client
            .send(TransportEvent::Text("pong".into()))
            .await
            .expect("send");
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Text("pong".into()))
        );
    }
}
