#![allow(dead_code)]

use book_engine::book::stream::{ChannelState, ReconnectPolicy};
use book_engine::book::types::{Order, Side};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

/// One server-side action on an accepted connection.
#[derive(Debug, Clone)]
pub enum Step {
    Send(String),
    Wait(Duration),
    /// Close handshake, then end the connection.
    Close,
    /// Drop the socket without a close frame.
    Drop,
}

/// WebSocket server that plays one script per accepted connection. Once the
/// scripts run out (or a script ends without closing) the connection is held
/// open until the client goes away.
pub struct ScriptedWsServer {
    pub url: String,
    connections: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    task: JoinHandle<()>,
}

impl ScriptedWsServer {
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let scripts = Arc::new(Mutex::new(VecDeque::from(scripts)));
        let connections = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let auth_headers = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let connections = connections.clone();
            let open = open.clone();
            let auth_headers = auth_headers.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let script = scripts.lock().unwrap().pop_front().unwrap_or_default();
                    let headers = auth_headers.clone();
                    let open = open.clone();
                    connections.fetch_add(1, Ordering::SeqCst);

                    tokio::spawn(async move {
                        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                            let auth = req
                                .headers()
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            headers.lock().unwrap().push(auth);
                            Ok(resp)
                        };
                        let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                            return;
                        };
                        let _open = OpenGuard::new(open);

                        for step in script {
                            match step {
                                Step::Send(text) => {
                                    if ws.send(Message::Text(text)).await.is_err() {
                                        return;
                                    }
                                }
                                Step::Wait(duration) => sleep(duration).await,
                                Step::Close => {
                                    let _ = ws.close(None).await;
                                    while let Some(Ok(_)) = ws.next().await {}
                                    return;
                                }
                                Step::Drop => return,
                            }
                        }

                        while let Some(Ok(_)) = ws.next().await {}
                    });
                }
            })
        };

        Self {
            url,
            connections,
            open,
            auth_headers,
            task,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections upgraded and not yet finished on the server side.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().unwrap().clone()
    }
}

impl Drop for ScriptedWsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn new(open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self(open)
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

pub fn order_json(id: i64, side: Side, price: f64, amount: f64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "user_id": 1,
        "username": format!("trader{}", id),
        "order_type": side.as_str(),
        "price": price,
        "amount": amount,
        "status": "active",
        "created_at": "2024-05-01T10:00:00Z"
    })
}

pub fn new_order_frame(id: i64, side: Side) -> String {
    serde_json::json!({ "type": "new_order", "order": order_json(id, side, 100.0, 2.0) }).to_string()
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        max_retries: 0,
        ping_interval: Duration::from_secs(30),
        buffer: 64,
        stable_after: Duration::from_secs(1),
    }
}

pub fn ids(orders: &[Order]) -> Vec<i64> {
    orders.iter().map(|o| o.id).collect()
}

pub async fn recv_order(rx: &mut mpsc::Receiver<Order>) -> Option<Order> {
    timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
}

pub async fn wait_for_state<F>(rx: &mut watch::Receiver<ChannelState>, predicate: F) -> bool
where
    F: Fn(&ChannelState) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let matched = predicate(&rx.borrow_and_update());
        if matched {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.changed()).await {
            Ok(Ok(())) => continue,
            _ => return false,
        }
    }
}

pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}
