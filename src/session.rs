use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::book::client::ApiClient;
use crate::book::gateway::OrderGateway;
use crate::book::snapshot::SnapshotLoader;
use crate::book::store::ReconciliationStore;
use crate::book::stream::{ChannelState, LiveChannel, ReconnectPolicy};
use crate::book::types::{Book, Order, OrderId, Side};
use crate::error::{BookError, Result};

/// Everything a view activation needs, passed in explicitly. The session
/// never reads ambient auth state.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub api_base_url: String,
    pub stream_url: String,
    pub auth_token: Option<String>,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub snapshots_applied: u64,
    pub pushes_applied: u64,
    pub pushes_ignored: u64,
}

#[derive(Default)]
struct SessionBook {
    store: ReconciliationStore,
    // pushes seen while a snapshot load is in flight
    in_flight: Option<Vec<Order>>,
    stats: SessionStats,
}

type SharedBook = Arc<RwLock<SessionBook>>;

/// One view activation: owns one book and one live channel.
///
/// The channel is subscribed on activation and torn down by [`end`](Self::end).
/// Dropping a session without calling `end` still aborts its tasks.
pub struct BookSession {
    book: SharedBook,
    api: ApiClient,
    loader: SnapshotLoader,
    gateway: OrderGateway,
    channel: Mutex<LiveChannel>,
    channel_state: watch::Receiver<ChannelState>,
    ingestion: Mutex<Option<JoinHandle<()>>>,
    refresh_lock: Arc<Mutex<()>>,
    updates: broadcast::Sender<Order>,
}

impl BookSession {
    /// Creates an empty book and subscribes the live channel. Pushes are
    /// applied as they arrive, before or after the first snapshot.
    pub async fn activate(ctx: SessionContext, policy: ReconnectPolicy) -> Result<Self> {
        let api = ApiClient::new(ctx.api_base_url.clone(), ctx.auth_token.clone(), ctx.http_timeout)?;
        let mut channel = LiveChannel::new(ctx.stream_url.clone(), ctx.auth_token.clone(), policy)?;
        let channel_state = channel.state_changes();

        let book: SharedBook = Arc::new(RwLock::new(SessionBook::default()));
        let (updates, _) = broadcast::channel(1000);

        let receiver = channel.subscribe()?;
        let ingestion = tokio::spawn(ingest(
            receiver,
            book.clone(),
            updates.clone(),
            channel.state_changes(),
        ));

        info!("🚀 Book session activated (api: {}, stream: {})", ctx.api_base_url, ctx.stream_url);

        Ok(Self {
            book,
            loader: SnapshotLoader::new(api.clone()),
            gateway: OrderGateway::new(api.clone()),
            api,
            channel: Mutex::new(channel),
            channel_state,
            ingestion: Mutex::new(Some(ingestion)),
            refresh_lock: Arc::new(Mutex::new(())),
            updates,
        })
    }

    /// Loads a snapshot and applies it as a full replacement. Pushes that
    /// arrive while the load is in flight are re-applied on top, so an order
    /// created after the server built the snapshot is not lost.
    ///
    /// The load runs on its own task and completes even if the caller stops
    /// waiting; the push record is always disarmed when it finishes. Failures
    /// are returned to the caller and never retried here.
    pub async fn refresh(&self) -> Result<Arc<Book>> {
        let guard = Arc::clone(&self.refresh_lock).lock_owned().await;
        let book = Arc::clone(&self.book);
        let loader = self.loader.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            load_and_apply(&book, &loader).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(BookError::Transport(format!("snapshot refresh aborted: {}", e))),
        }
    }

    pub async fn current_book(&self) -> Arc<Book> {
        self.book.read().await.store.current_book()
    }

    /// Submits upstream. The order appears in the book only once echoed back.
    pub async fn submit(&self, side: Side, price: f64, amount: f64) -> Result<OrderId> {
        self.gateway.submit(side, price, amount).await
    }

    pub async fn my_orders(&self) -> Result<Vec<Order>> {
        self.api.fetch_my_orders().await
    }

    /// Each order applied from the live channel, in application order.
    pub fn updates(&self) -> broadcast::Receiver<Order> {
        self.updates.subscribe()
    }

    pub async fn stats(&self) -> SessionStats {
        self.book.read().await.stats.clone()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state.borrow().clone()
    }

    pub async fn is_active(&self) -> bool {
        self.ingestion.lock().await.is_some()
    }

    /// Explicit teardown: closes the channel, cancels any pending reconnect
    /// and waits for ingestion to drain. Safe to call more than once.
    pub async fn end(&self) -> Result<()> {
        let outcome = self.channel.lock().await.unsubscribe().await;
        if let Err(e) = &outcome {
            warn!("Live channel had already failed: {}", e);
        }

        if let Some(ingestion) = self.ingestion.lock().await.take() {
            if let Err(e) = ingestion.await {
                error!("Ingestion task ended abnormally: {}", e);
            }
            info!("👋 Book session ended");
        }
        outcome
    }
}

impl Drop for BookSession {
    fn drop(&mut self) {
        if let Some(ingestion) = self.ingestion.get_mut().take() {
            ingestion.abort();
        }
    }
}

async fn load_and_apply(book: &SharedBook, loader: &SnapshotLoader) -> Result<Arc<Book>> {
    book.write().await.in_flight = Some(Vec::new());

    let loaded = loader.load().await;

    let mut state = book.write().await;
    let in_flight = state.in_flight.take().unwrap_or_default();
    let snapshot = match loaded {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("❌ Snapshot load failed: {}", e);
            return Err(e);
        }
    };

    state.store.apply_snapshot(snapshot);
    let mut replayed = 0;
    for order in in_flight {
        if state.store.apply_incoming(order) {
            replayed += 1;
        }
    }
    state.stats.snapshots_applied += 1;

    if replayed > 0 {
        info!(replayed, "Re-applied pushes received during snapshot load");
    }
    Ok(state.store.current_book())
}

async fn ingest(
    mut receiver: mpsc::Receiver<Order>,
    book: SharedBook,
    updates: broadcast::Sender<Order>,
    channel_state: watch::Receiver<ChannelState>,
) {
    info!("🔥 Ingestion started");
    let mut message_count: u64 = 0;

    while let Some(order) = receiver.recv().await {
        message_count += 1;

        let applied = {
            let mut state = book.write().await;
            let applied = state.store.apply_incoming(order.clone());
            if let Some(in_flight) = state.in_flight.as_mut() {
                in_flight.push(order.clone());
            }
            if applied {
                state.stats.pushes_applied += 1;
            } else {
                state.stats.pushes_ignored += 1;
            }
            applied
        };

        if applied {
            let _ = updates.send(order);
        }

        if message_count % 200 == 0 {
            info!("📊 Processed {} pushes total", message_count);
        }
    }

    let final_state = channel_state.borrow().clone();
    match final_state {
        ChannelState::Failed { reason } => {
            error!("❌ Live channel failed ({}); book will only change on refresh", reason)
        }
        _ => info!("Ingestion stopped after {} pushes", message_count),
    }
}
