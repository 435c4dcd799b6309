pub mod types;
pub mod client;
pub mod snapshot;
pub mod stream;
pub mod store;
pub mod gateway;
