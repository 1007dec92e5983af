use std::time::Duration;

use url::Url;

use crate::error::ChatError;

/// Bounded retry schedule for connection attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (1-based): the base delay
    /// scaled linearly, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Knobs for the chat client.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    server_url: Url,
    pub history_page_size: u32,
    pub retry: RetryPolicy,
    pub typing_expiry: Duration,
}

impl ChatConfig {
    /// Validates the base URL; only `http` and `https` schemes are accepted
    /// (the live transport derives its `ws`/`wss` endpoint from it).
    pub fn new(server_url: impl AsRef<str>) -> Result<Self, ChatError> {
        let server_url = Url::parse(server_url.as_ref())?;
        match server_url.scheme() {
            "http" | "https" => {}
            other => return Err(ChatError::UnsupportedScheme(other.to_string())),
        }
        Ok(Self {
            server_url,
            history_page_size: 50,
            retry: RetryPolicy::default(),
            typing_expiry: Duration::from_secs(3),
        })
    }

    pub fn with_history_page_size(mut self, limit: u32) -> Self {
        self.history_page_size = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_typing_expiry(mut self, expiry: Duration) -> Self {
        self.typing_expiry = expiry;
        self
    }

    /// Base URL without a trailing slash, ready for endpoint formatting.
    pub(crate) fn base(&self) -> &str {
        self.server_url.as_str().trim_end_matches('/')
    }

    /// WebSocket endpoint derived from the base URL.
    pub(crate) fn ws_url(&self) -> String {
        let base = self.base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            // scheme is validated in `new`
            base.to_string()
        };
        format!("{ws_base}/chat/ws")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_increase_up_to_the_ceiling() {
        let retry = RetryPolicy::default();
        let secs: Vec<u64> = (1..=6).map(|n| retry.delay_after(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 3, 4, 5, 5]);
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = ChatConfig::new("ftp://chat.example.com").expect_err("must reject");
        assert!(matches!(err, ChatError::UnsupportedScheme(scheme) if scheme == "ftp"));
    }

    #[test]
    fn derives_ws_endpoint_from_base_url() {
        let config = ChatConfig::new("https://api.example.com").expect("config");
        assert_eq!(config.ws_url(), "wss://api.example.com/chat/ws");

        let config = ChatConfig::new("http://127.0.0.1:4000/").expect("config");
        assert_eq!(config.ws_url(), "ws://127.0.0.1:4000/chat/ws");
    }
}
