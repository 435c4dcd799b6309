use tracing::{error, info};

use crate::book::client::ApiClient;
use crate::book::types::{CreateOrderRequest, OrderId, Side};
use crate::error::{BookError, Result};

/// Sends new orders upstream. Never touches the reconciliation store: a
/// submitted order shows up in the book only once the live channel (or a
/// later snapshot) echoes it back.
#[derive(Clone, Debug)]
pub struct OrderGateway {
    api: ApiClient,
}

impl OrderGateway {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn submit(&self, side: Side, price: f64, amount: f64) -> Result<OrderId> {
        let request = validate(side, price, amount)?;

        match self.api.create_order(&request).await {
            Ok(order) => {
                info!(order_id = order.id, side = %side, price, amount, "Order submitted");
                Ok(order.id)
            }
            Err(e) => {
                error!(side = %side, price, amount, "Order submission failed: {}", e);
                Err(e)
            }
        }
    }
}

fn validate(side: Side, price: f64, amount: f64) -> Result<CreateOrderRequest> {
    if !(price.is_finite() && price > 0.0) {
        return Err(BookError::Validation(format!("price must be greater than 0, got {}", price)));
    }
    if !(amount.is_finite() && amount > 0.0) {
        return Err(BookError::Validation(format!("amount must be greater than 0, got {}", amount)));
    }
    Ok(CreateOrderRequest {
        order_type: side,
        price,
        amount,
    })
}
