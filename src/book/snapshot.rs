use tracing::{info, warn};

use crate::book::client::ApiClient;
use crate::book::types::{Book, OrderBookPayload};
use crate::error::Result;

/// Fetches the full current book from the REST boundary.
///
/// Holds no mutable state: each `load` returns an independent `Book`.
#[derive(Clone, Debug)]
pub struct SnapshotLoader {
    api: ApiClient,
}

impl SnapshotLoader {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn load(&self) -> Result<Book> {
        let payload = self.api.fetch_order_book().await?;
        let book = Book::from(drop_malformed(payload));

        info!(
            bids = book.bids().len(),
            asks = book.asks().len(),
            "Snapshot loaded"
        );
        Ok(book)
    }
}

fn drop_malformed(mut payload: OrderBookPayload) -> OrderBookPayload {
    for orders in [&mut payload.buy_orders, &mut payload.sell_orders] {
        orders.retain(|order| {
            let keep = order.is_well_formed();
            if !keep {
                warn!(order_id = order.id, price = order.price, amount = order.amount, "Dropping malformed snapshot order");
            }
            keep
        });
    }
    payload
}
