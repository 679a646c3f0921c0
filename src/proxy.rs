//! Proxy rotation
//!
//! A single shared cursor over the configured proxy list. The cursor is
//! advanced each time a session is (re)launched and is not tied to any
//! particular pool slot.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

/// Shared rotation cursor over a fixed proxy list.
pub struct ProxyRotation {
    proxies: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyRotation {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next proxy URL, wrapping modulo the list length.
    /// None when no proxies are configured.
    pub fn next(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let pos = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        let proxy = self.proxies[pos].clone();
        debug!("Proxy rotation cursor at {} -> {}", pos, proxy);
        Some(proxy)
    }

    pub fn is_enabled(&self) -> bool {
        !self.proxies.is_empty()
    }
}
