use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::book::types::{Book, Order, OrderId};

/// Single source of truth for one view session.
///
/// Readers get an `Arc<Book>`; a mutation clones the book only while an
/// earlier view is still held, so a returned view never changes under its
/// holder.
#[derive(Debug, Default)]
pub struct ReconciliationStore {
    book: Arc<Book>,
    // ids present in either side
    ids: HashSet<OrderId>,
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole state. A second snapshot fully supersedes the first.
    pub fn apply_snapshot(&mut self, book: Book) {
        self.ids = book.iter().map(|order| order.id).collect();
        self.book = Arc::new(book);
    }

    /// Prepends `order` to its side unless its id is already present.
    /// First writer for an id wins.
    pub fn apply_incoming(&mut self, order: Order) -> bool {
        if !self.ids.insert(order.id) {
            debug!(order_id = order.id, "duplicate order ignored");
            return false;
        }
        Arc::make_mut(&mut self.book).prepend(order);
        true
    }

    pub fn current_book(&self) -> Arc<Book> {
        Arc::clone(&self.book)
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
