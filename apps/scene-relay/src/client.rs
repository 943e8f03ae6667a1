//! Minimal duplex client used by the `send` subcommand and integration tests.

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use scene_proto::{Command, ErrorBody, InitAck, Message, MessageKind, Outcome};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Connect to `base_url` (e.g. `ws://localhost:9000`); `/ws` is appended
    /// unless already present.
    pub async fn connect(base_url: &str) -> Result<Self> {
        let trimmed = base_url.trim_end_matches('/');
        let url = if trimmed.ends_with("/ws") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/ws")
        };
        debug!(url = %url, "connecting");
        let (ws, _) = match timeout(Duration::from_secs(5), connect_async(&url)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(anyhow!("connection to {url} failed: {e}")),
            Err(_) => bail!("connection timeout - is scene-relay running at {url}?"),
        };
        Ok(Self { ws })
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.send_raw(&message.to_json()).await
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.ws.send(WsMessage::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Next protocol message, or `None` once the server closes the socket.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                WsMessage::Text(text) => {
                    let message: Message = serde_json::from_str(text.as_str())
                        .with_context(|| format!("undecodable frame: {}", text.as_str()))?;
                    return Ok(Some(message));
                }
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<Message>> {
        timeout(wait, self.recv())
            .await
            .map_err(|_| anyhow!("no message within {wait:?}"))?
    }

    pub async fn init(&mut self, client_type: Option<&str>) -> Result<InitAck> {
        let hello = Message::init(client_type);
        self.send(&hello).await?;
        loop {
            let Some(reply) = self.recv_timeout(Duration::from_secs(5)).await? else {
                bail!("connection closed during init");
            };
            if reply.id != hello.id {
                continue;
            }
            return match reply.kind {
                MessageKind::Init => Ok(reply.payload_as()?),
                MessageKind::Error => {
                    let body: ErrorBody = reply.payload_as()?;
                    bail!("init rejected: {} ({})", body.message, body.code)
                }
                other => bail!("unexpected {other} reply to init"),
            };
        }
    }

    /// Send a command and wait for its response. Unrelated messages are skipped.
    pub async fn execute(&mut self, command: &Command, wait: Duration) -> Result<Outcome> {
        self.send(&Message::command(command)).await?;
        loop {
            let Some(reply) = self.recv_timeout(wait).await? else {
                bail!("connection closed before response to {}", command.id);
            };
            if reply.id != command.id {
                continue;
            }
            return match reply.kind {
                MessageKind::Response => Ok(reply.payload_as()?),
                MessageKind::Error => {
                    let body: ErrorBody = reply.payload_as()?;
                    bail!("command {} rejected: {} ({})", command.id, body.message, body.code)
                }
                other => bail!("unexpected {other} reply to command {}", command.id),
            };
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
