use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Order identity assigned by the upstream authority.
pub type OrderId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resting order as announced by the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(rename = "username", default, deserialize_with = "null_as_default")]
    pub owner: String,
    #[serde(rename = "order_type")]
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(id: OrderId, owner: impl Into<String>, side: Side, price: f64, amount: f64) -> Self {
        Self {
            id,
            user_id: None,
            owner: owner.into(),
            side,
            price,
            amount,
            status: "active".to_string(),
            created_at: None,
        }
    }

    /// Displayed total. Always derived, never stored.
    pub fn notional(&self) -> f64 {
        self.price * self.amount
    }

    /// Price and amount are finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.price.is_finite() && self.amount.is_finite() && self.price >= 0.0 && self.amount >= 0.0
    }
}

/// `GET /orders` response body. Either list may be missing or null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderBookPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub buy_orders: Vec<Order>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sell_orders: Vec<Order>,
}

/// Two-sided book. Bids hold only buy orders, asks only sell orders, and an
/// id appears at most once across both sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Book {
    #[serde(rename = "buy_orders")]
    bids: Vec<Order>,
    #[serde(rename = "sell_orders")]
    asks: Vec<Order>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book in the given order, partitioned by each order's own side.
    /// Repeated ids keep their first occurrence.
    pub fn from_orders<I>(orders: I) -> Self
    where
        I: IntoIterator<Item = Order>,
    {
        let mut book = Book::new();
        let mut seen = HashSet::new();
        for order in orders {
            if !seen.insert(order.id) {
                continue;
            }
            match order.side {
                Side::Buy => book.bids.push(order),
                Side::Sell => book.asks.push(order),
            }
        }
        book
    }

    pub fn bids(&self) -> &[Order] {
        &self.bids
    }

    pub fn asks(&self) -> &[Order] {
        &self.asks
    }

    pub fn side(&self, side: Side) -> &[Order] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.iter().any(|order| order.id == id)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.iter().find(|order| order.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.bids.iter().chain(self.asks.iter())
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Copy sorted for display: bids by price descending, asks ascending.
    /// The sort is stable so equal prices keep insertion order.
    pub fn by_price_priority(&self) -> Book {
        let mut view = self.clone();
        view.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
        view.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
        view
    }

    /// Prepends to the sequence matching the order's side.
    pub(crate) fn prepend(&mut self, order: Order) {
        match order.side {
            Side::Buy => self.bids.insert(0, order),
            Side::Sell => self.asks.insert(0, order),
        }
    }
}

impl From<OrderBookPayload> for Book {
    fn from(payload: OrderBookPayload) -> Self {
        Book::from_orders(payload.buy_orders.into_iter().chain(payload.sell_orders))
    }
}

/// One frame on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    NewOrder { order: Order },
}

/// `POST /orders` request body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub order_type: Side,
    pub price: f64,
    pub amount: f64,
}

/// Error body returned by the REST boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorPayload {
    pub error: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}
