//! WebSocket transport built on tokio-tungstenite

use super::{Channel, Transport};
use crate::error::{BotError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Connects to room endpoints over WebSocket, optionally with a bearer token
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    access_token: Option<String>,
}

impl WebSocketTransport {
    pub fn new(access_token: Option<String>) -> Self {
        Self { access_token }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Channel>> {
        let mut request = url.into_client_request().map_err(|e| BotError::Transport {
            message: format!("Invalid room URL {}: {}", url, e),
        })?;

        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                BotError::ConfigurationError {
                    message: format!("Access token is not a valid header value: {}", e),
                }
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = connect_async(request).await.map_err(classify_connect_error)?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        Ok(Box::new(WebSocketChannel { stream }))
    }
}

/// Credentials the server refuses will be refused on every retry too
fn classify_connect_error(error: tungstenite::Error) -> BotError {
    let status = match &error {
        tungstenite::Error::Http(response) => Some(response.status().as_u16()),
        _ => None,
    };
    classify_handshake(status, error.to_string())
}

fn classify_handshake(status: Option<u16>, message: String) -> BotError {
    match status {
        Some(code @ (401 | 403)) => BotError::Fatal {
            reason: format!("Server rejected credentials (HTTP {})", code),
        },
        _ => BotError::Transport {
            message: format!("WebSocket connect failed: {}", message),
        },
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BotError::Transport {
                message: format!("WebSocket send failed: {}", e),
            })?;
        Ok(())
    }

    async fn receive(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return None;
                }
                // Control and binary frames carry nothing for us
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(BotError::Transport {
                        message: format!("WebSocket receive failed: {}", e),
                    }
                    .into()))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(BotError::Transport {
                message: format!("WebSocket close failed: {}", e),
            }
            .into()),
        }
    }
}
