use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::book::types::{Order, StreamMessage};
use crate::error::{BookError, Result};

/// Reconnect and delivery settings for a [`LiveChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Consecutive failed attempts tolerated before giving up (0 = unlimited).
    pub max_retries: u32,
    /// Keepalive ping period on an open connection.
    pub ping_interval: Duration,
    /// Capacity of the delivery queue towards the consumer.
    pub buffer: usize,
    /// A connection open at least this long resets the backoff; shorter ones
    /// count as a failed attempt.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: 0,
            ping_interval: Duration::from_secs(30),
            buffer: 1024,
            stable_after: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// `initial * 2^(attempt-1)`, capped at `max_backoff`. Attempt 0 is the
    /// first connect and has no delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt - 1))
            .min(self.max_backoff)
    }

    fn attempt_after_close(&self, attempt: u32, open_for: Duration) -> u32 {
        if open_for >= self.stable_after {
            1
        } else {
            attempt.saturating_add(1)
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt > self.max_retries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    /// No consumer subscribed.
    Idle,
    Connecting,
    Open,
    /// Connection lost; a reconnect is pending.
    Closed,
    /// Reconnect policy exhausted. Terminal for the subscription.
    Failed { reason: String },
}

struct Subscription {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

/// Persistent duplex connection delivering newly created orders.
///
/// At most one consumer at a time. Delivery keeps the order in which frames
/// arrived from the transport; deduplication is left to the store.
pub struct LiveChannel {
    stream_url: String,
    auth_header: Option<HeaderValue>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    active: Option<Subscription>,
}

impl LiveChannel {
    pub fn new(stream_url: impl Into<String>, auth_token: Option<String>, policy: ReconnectPolicy) -> Result<Self> {
        let stream_url = stream_url.into();
        let url = Url::parse(&stream_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(BookError::Validation(format!("stream url must be ws:// or wss://, got {}", stream_url)));
        }
        let auth_header = auth_token
            .map(|token| {
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| BookError::Validation(format!("invalid auth token: {}", e)))
            })
            .transpose()?;

        let (state, _) = watch::channel(ChannelState::Idle);
        Ok(Self {
            stream_url,
            auth_header,
            policy,
            state: Arc::new(state),
            active: None,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.as_ref().is_some_and(|s| !s.task.is_finished())
    }

    /// Opens the connection and starts delivering orders to the returned
    /// receiver. The receiver yields `None` once the channel is unsubscribed
    /// or the reconnect policy gives up.
    pub fn subscribe(&mut self) -> Result<mpsc::Receiver<Order>> {
        if self.is_subscribed() {
            return Err(BookError::AlreadySubscribed);
        }
        if let Some(stale) = self.active.take() {
            stale.task.abort();
        }

        let (consumer, receiver) = mpsc::channel(self.policy.buffer.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = ChannelWorker {
            stream_url: self.stream_url.clone(),
            auth_header: self.auth_header.clone(),
            policy: self.policy.clone(),
            state: Arc::clone(&self.state),
            consumer,
        };
        let task = tokio::spawn(worker.run(shutdown_rx));

        info!("📻 Live channel subscribed to {}", self.stream_url);
        self.active = Some(Subscription { shutdown, task });
        Ok(receiver)
    }

    /// Closes the connection and cancels any pending reconnect. Returns the
    /// hard error if the subscription had already failed by policy.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        let outcome = match self.active.take() {
            Some(subscription) => {
                subscription.shutdown.send_replace(true);
                match subscription.task.await {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Ok(()),
                    Err(e) => {
                        error!("Live channel task panicked: {}", e);
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        self.state.send_replace(ChannelState::Idle);
        info!("🔌 Live channel unsubscribed");
        outcome
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(subscription) = self.active.take() {
            subscription.task.abort();
        }
    }
}

enum Disconnect {
    Closed { reason: String, open_for: Duration },
    ConsumerGone,
}

struct ChannelWorker {
    stream_url: String,
    auth_header: Option<HeaderValue>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    consumer: mpsc::Sender<Order>,
}

impl ChannelWorker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                if self.policy.exhausted(attempt) {
                    let attempts = self.policy.max_retries;
                    error!(attempts, url = %self.stream_url, "❌ Live channel reconnect attempts exhausted");
                    self.set_state(ChannelState::Failed {
                        reason: format!("gave up after {} reconnect attempts", attempts),
                    });
                    return Err(BookError::ChannelExhausted { attempts });
                }

                let backoff = self.policy.backoff(attempt);
                info!(attempt, backoff_ms = backoff.as_millis() as u64, "⏳ Waiting before reconnecting");
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = cancelled(&mut shutdown) => return Ok(()),
                    _ = self.consumer.closed() => return Ok(()),
                }
            }

            self.set_state(ChannelState::Connecting);
            let outcome = tokio::select! {
                outcome = self.connect_and_listen() => outcome,
                _ = cancelled(&mut shutdown) => return Ok(()),
            };

            match outcome {
                Ok(Disconnect::ConsumerGone) => {
                    info!("Live channel consumer dropped, stopping");
                    return Ok(());
                }
                Ok(Disconnect::Closed { reason, open_for }) => {
                    attempt = self.policy.attempt_after_close(attempt, open_for);
                    warn!(attempt, open_ms = open_for.as_millis() as u64, "🔌 Live channel closed: {}", reason);
                    self.set_state(ChannelState::Closed);
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    error!(attempt, "❌ Live channel connect failed: {}", e);
                    self.set_state(ChannelState::Closed);
                }
            }
        }
    }

    fn request(&self) -> Result<Request> {
        let mut request = self.stream_url.as_str().into_client_request()?;
        if let Some(value) = &self.auth_header {
            request.headers_mut().insert(AUTHORIZATION, value.clone());
        }
        Ok(request)
    }

    /// `Err` only when the connection never opened.
    async fn connect_and_listen(&self) -> Result<Disconnect> {
        info!("🔌 Connecting to live channel: {}", self.stream_url);
        let (ws_stream, _) = connect_async(self.request()?).await?;
        self.set_state(ChannelState::Open);
        info!("✅ Live channel open");
        let opened = Instant::now();
        let closed = |reason: String| Disconnect::Closed {
            reason,
            open_for: opened.elapsed(),
        };

        let (mut write, mut read) = ws_stream.split();
        let period = self.policy.ping_interval.max(Duration::from_millis(1));
        let mut ping_interval = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                msg_result = read.next() => {
                    match msg_result {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(order) = decode_frame(&text) {
                                debug!(order_id = order.id, side = %order.side, "📨 Received order");
                                if self.consumer.send(order).await.is_err() {
                                    return Ok(Disconnect::ConsumerGone);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return Ok(closed(format!("pong failed: {}", e)));
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Ok(closed("closed by server".to_string()));
                        }
                        Some(Ok(_)) => {
                            // Binary, Pong and raw frames carry no orders
                        }
                        Some(Err(e)) => {
                            return Ok(closed(format!("read error: {}", e)));
                        }
                        None => {
                            return Ok(closed("stream ended".to_string()));
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        return Ok(closed(format!("keepalive ping failed: {}", e)));
                    }
                    debug!("💓 Sent keepalive ping");
                }
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        debug!(?state, "Live channel state");
        self.state.send_replace(state);
    }
}

/// Resolves once shutdown is requested or the owning channel is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// One text frame to at most one order. Anything undecodable is logged and
/// dropped.
fn decode_frame(text: &str) -> Option<Order> {
    match serde_json::from_str::<StreamMessage>(text) {
        Ok(StreamMessage::NewOrder { order }) if order.is_well_formed() => Some(order),
        Ok(StreamMessage::NewOrder { order }) => {
            warn!(order_id = order.id, "Dropping order with invalid price or amount");
            None
        }
        Err(e) => {
            warn!("Dropping malformed live frame: {} - Frame: {}", e, text);
            None
        }
    }
}
