use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::book::stream::ReconnectPolicy;
use crate::session::SessionContext;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub stream_url: String,
    pub auth_token: Option<String>,

    pub server_port: u16,
    pub http_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_secs: u64,
    pub reconnect_max_retries: u32,
    pub reconnect_stable_secs: u64,
    pub ping_interval_secs: u64,
    pub channel_buffer: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env::var("BOOK_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api".to_string()),
            stream_url: env::var("BOOK_STREAM_URL")
                .unwrap_or_else(|_| "ws://localhost:8080/ws".to_string()),
            auth_token: env::var("BOOK_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),

            server_port: parse_var("PORT", 8090),
            http_timeout_secs: parse_var("BOOK_HTTP_TIMEOUT_SECS", 10),
            reconnect_initial_ms: parse_var("BOOK_RECONNECT_INITIAL_MS", 500),
            reconnect_max_secs: parse_var("BOOK_RECONNECT_MAX_SECS", 30),
            reconnect_max_retries: parse_var("BOOK_RECONNECT_MAX_RETRIES", 0),
            reconnect_stable_secs: parse_var("BOOK_RECONNECT_STABLE_SECS", 10),
            ping_interval_secs: parse_var("BOOK_PING_INTERVAL_SECS", 30),
            channel_buffer: parse_var("BOOK_CHANNEL_BUFFER", 1024),
        }
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            api_base_url: self.api_base_url.clone(),
            stream_url: self.stream_url.clone(),
            auth_token: self.auth_token.clone(),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(self.reconnect_initial_ms),
            max_backoff: Duration::from_secs(self.reconnect_max_secs),
            max_retries: self.reconnect_max_retries,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            buffer: self.channel_buffer.max(1),
            stable_after: Duration::from_secs(self.reconnect_stable_secs),
        }
    }
}

fn parse_var<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("Invalid {} '{}', defaulting to {}", key, raw, default);
        default
    })
}
