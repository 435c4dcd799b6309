use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

use crate::book::types::{ApiErrorPayload, CreateOrderRequest, Order, OrderBookPayload};
use crate::error::{BookError, Result};

/// REST boundary shared by the snapshot loader and the submission gateway.
#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)?;

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /orders`
    pub async fn fetch_order_book(&self) -> Result<OrderBookPayload> {
        let response = self
            .authorized(self.client.get(self.url("/orders")))
            .send()
            .await?;
        decode(response, "Failed to get order book").await
    }

    /// `POST /orders`. Returns the order as created upstream.
    pub async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order> {
        let response = self
            .authorized(self.client.post(self.url("/orders")))
            .json(request)
            .send()
            .await?;
        decode(response, "Failed to create order").await
    }

    /// `GET /orders/my`: the caller's own orders, in server order.
    pub async fn fetch_my_orders(&self) -> Result<Vec<Order>> {
        let response = self
            .authorized(self.client.get(self.url("/orders/my")))
            .send()
            .await?;
        decode(response, "Failed to get orders").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Non-success statuses become `Transport`, carrying the upstream `error`
/// message when the body has one. Success bodies that fail to parse become
/// `Format`.
async fn decode<T: DeserializeOwned>(response: Response, generic: &str) -> Result<T> {
    let status = response.status();
    let url = response.url().clone();
    let text = response.text().await?;

    if !status.is_success() {
        error!("API error: {} {} - Body: {}", status, url, text);
        let message = serde_json::from_str::<ApiErrorPayload>(&text)
            .ok()
            .map(|payload| payload.error)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("{} (HTTP {})", generic, status.as_u16()));
        return Err(BookError::Transport(message));
    }

    debug!("API response from {}: {} bytes", url, text.len());
    serde_json::from_str(&text).map_err(|e| {
        error!("Failed to parse API response from {}: {}", url, e);
        BookError::Format(e.to_string())
    })
}
