//! Live order-book view.
//!
//! A REST snapshot and an at-least-once stream of new-order pushes are
//! reconciled into one duplicate-free, two-sided book:
//!
//! ```text
//!  GET /orders ──► SnapshotLoader ──┐
//!                                   ▼
//!  /ws pushes ──► LiveChannel ──► ReconciliationStore ──► current_book()
//!
//!  submit() ──► OrderGateway ──► POST /orders   (echoed back via /ws)
//! ```

pub mod book;
pub mod config;
pub mod error;
pub mod server;
pub mod session;

pub use book::store::ReconciliationStore;
pub use book::stream::{ChannelState, LiveChannel, ReconnectPolicy};
pub use book::types::{Book, Order, OrderId, Side};
pub use error::{BookError, Result};
pub use session::{BookSession, SessionContext, SessionStats};
