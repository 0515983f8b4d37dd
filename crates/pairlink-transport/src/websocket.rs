//! WebSocket client using `tokio-tungstenite`.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connector, Socket, SocketEvent, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A [`Connector`] that dials `ws://` and `wss://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Socket = WebSocketConnection;

    async fn connect(&self, url: &str) -> Result<Self::Socket, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        tracing::debug!(status = %response.status(), "WebSocket connected");
        Ok(WebSocketConnection { ws })
    }
}

/// A single client-side WebSocket.
pub struct WebSocketConnection {
    ws: WsStream,
}

impl Socket for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.ws.send(Message::Text(text.into())).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&mut self) -> Result<SocketEvent, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(SocketEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    return Ok(SocketEvent::Closed(code));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
                None => return Ok(SocketEvent::Closed(None)),
            }
        }
    }

    async fn close(&mut self, code: Option<u16>) -> Result<(), TransportError> {
        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        });
        match self.ws.close(frame).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }
}
