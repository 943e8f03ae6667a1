use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::RemoteSurface;
use crate::error::SurfaceError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<DashMap<u64, oneshot::Sender<Result<Value, SurfaceError>>>>;

/// Runs scripts in an already-open browser page over the DevTools protocol.
///
/// Calls share one socket and are matched to replies by request id. The
/// socket is (re)opened lazily on the first call after a fault.
pub struct DevToolsSurface {
    url: String,
    next_id: AtomicU64,
    link: Mutex<Option<Link>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

#[derive(Clone)]
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
}

impl DevToolsSurface {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: AtomicU64::new(1),
            link: Mutex::new(None),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Bound the socket handshake and each request's wait for a reply.
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests sent on the current link that have no reply yet.
    pub async fn pending_requests(&self) -> usize {
        self.link
            .lock()
            .await
            .as_ref()
            .map_or(0, |link| link.pending.len())
    }

    async fn link(&self) -> Result<Link, SurfaceError> {
        let mut slot = self.link.lock().await;
        if let Some(link) = slot.as_ref() {
            if link.alive.load(Ordering::Acquire) {
                return Ok(link.clone());
            }
            debug!(url = %self.url, "devtools link is down; reconnecting");
        }
        let link = tokio::time::timeout(self.connect_timeout, open_link(&self.url))
            .await
            .map_err(|_| {
                SurfaceError::Transport(format!(
                    "connect {}: no handshake within {} ms",
                    self.url,
                    self.connect_timeout.as_millis()
                ))
            })??;
        *slot = Some(link.clone());
        Ok(link)
    }
}

async fn open_link(url: &str) -> Result<Link, SurfaceError> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| SurfaceError::Transport(format!("connect {url}: {e}")))?;
    info!(url, "attached to devtools page");

    let (mut write, mut read) = stream.split();
    let (outbound, mut rx) = mpsc::unbounded_channel::<String>();
    let pending: PendingMap = Arc::new(DashMap::new());
    let alive = Arc::new(AtomicBool::new(true));

    let writer_alive = alive.clone();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if write.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        writer_alive.store(false, Ordering::Release);
    });

    let reader_pending = pending.clone();
    let reader_alive = alive.clone();
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatch_reply(&reader_pending, text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "devtools socket error");
                    break;
                }
            }
        }
        reader_alive.store(false, Ordering::Release);
        let ids: Vec<u64> = reader_pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = reader_pending.remove(&id) {
                let _ = tx.send(Err(SurfaceError::Transport("devtools connection closed".into())));
            }
        }
        debug!("devtools reader ended");
    });

    Ok(Link {
        outbound,
        pending,
        alive,
    })
}

fn dispatch_reply(pending: &PendingMap, text: &str) {
    let Ok(reply) = serde_json::from_str::<Value>(text) else {
        debug!("ignoring non-JSON devtools frame");
        return;
    };
    // Events carry no id.
    let Some(id) = reply.get("id").and_then(Value::as_u64) else {
        return;
    };
    if let Some((_, tx)) = pending.remove(&id) {
        let _ = tx.send(interpret_reply(&reply));
    }
}

fn interpret_reply(reply: &Value) -> Result<Value, SurfaceError> {
    if let Some(err) = reply.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("devtools error");
        return Err(SurfaceError::Protocol(message.to_string()));
    }
    let result = reply
        .get("result")
        .ok_or_else(|| SurfaceError::Protocol("reply without result".into()))?;
    if let Some(details) = result.get("exceptionDetails") {
        let description = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("uncaught exception");
        return Err(SurfaceError::Script(description.to_string()));
    }
    // `undefined` comes back without a value.
    Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
}

/// Removes an abandoned request (e.g. the caller timed out) from the map.
struct PendingSlot<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[async_trait]
impl RemoteSurface for DevToolsSurface {
    fn name(&self) -> &'static str {
        "devtools"
    }

    async fn run(&self, script: &str, args: Value) -> Result<Value, SurfaceError> {
        let link = self.link().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let expression = format!("(async (args) => {{\n{script}\n}})({args})");
        let request = json!({
            "id": id,
            "method": "Runtime.evaluate",
            "params": {
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            },
        });

        let (tx, rx) = oneshot::channel();
        link.pending.insert(id, tx);
        let _slot = PendingSlot {
            pending: &link.pending,
            id,
        };
        if link.outbound.send(request.to_string()).is_err() || !link.alive.load(Ordering::Acquire) {
            return Err(SurfaceError::Transport("devtools connection closed".into()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(reply) => reply
                .map_err(|_| SurfaceError::Transport("devtools reply dropped".into()))?,
            Err(_) => Err(SurfaceError::Transport(format!(
                "no devtools reply within {} ms",
                self.request_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn reply_interpretation() {
        let ok = json!({"id": 1, "result": {"result": {"type": "object", "value": {"success": true}}}});
        assert_eq!(interpret_reply(&ok), Ok(json!({"success": true})));

        let undefined = json!({"id": 2, "result": {"result": {"type": "undefined"}}});
        assert_eq!(interpret_reply(&undefined), Ok(Value::Null));

        let thrown = json!({"id": 3, "result": {
            "result": {"type": "object"},
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "TypeError: boom"}}
        }});
        assert_eq!(
            interpret_reply(&thrown),
            Err(SurfaceError::Script("TypeError: boom".into()))
        );

        let failed = json!({"id": 4, "error": {"code": -32000, "message": "No target"}});
        assert_eq!(
            interpret_reply(&failed),
            Err(SurfaceError::Protocol("No target".into()))
        );
    }

    #[tokio::test]
    async fn evaluates_over_a_devtools_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(request["method"], "Runtime.evaluate");
                let expression = request["params"]["expression"].as_str().unwrap();
                assert!(expression.contains("\"angle\":45"));
                // An unrelated event first, then the reply.
                let event = json!({"method": "Runtime.consoleAPICalled", "params": {}});
                ws.send(Message::Text(event.to_string().into())).await.unwrap();
                let reply = json!({"id": request["id"], "result": {"result": {"value": {"success": true, "echo": 1}}}});
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        });

        let surface = DevToolsSurface::new(format!("ws://{addr}"));
        let value = surface
            .run("return args;", json!({"params": {"angle": 45}}))
            .await
            .unwrap();
        assert_eq!(value, json!({"success": true, "echo": 1}));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_fault() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let surface = DevToolsSurface::new(format!("ws://{addr}"));
        let err = surface.run("return 1;", Value::Null).await.unwrap_err();
        assert!(matches!(err, SurfaceError::Transport(_)));
    }

    #[tokio::test]
    async fn unanswered_requests_are_bounded_and_forgotten() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Swallow every request without replying.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let surface = DevToolsSurface::new(format!("ws://{addr}"))
            .with_timeouts(Duration::from_secs(2), Duration::from_millis(50));
        for _ in 0..5 {
            let err = surface.run("return 1;", Value::Null).await.unwrap_err();
            assert!(matches!(err, SurfaceError::Transport(_)));
        }
        assert_eq!(surface.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn stalled_handshake_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept the TCP connection but never answer the upgrade.
            let (_stream, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let surface = DevToolsSurface::new(format!("ws://{addr}"))
            .with_timeouts(Duration::from_millis(100), Duration::from_secs(1));
        let err = tokio::time::timeout(Duration::from_secs(5), surface.run("return 1;", Value::Null))
            .await
            .expect("connect should give up on its own")
            .unwrap_err();
        assert!(matches!(err, SurfaceError::Transport(msg) if msg.contains("handshake")));
    }
}
