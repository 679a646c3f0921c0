//! Typed crawl events
//!
//! The executor publishes events describing work discovered during
//! extraction; an external frontier queue and artifact store consume them.
//! Publishing is synchronous and fire-and-forget: the core holds no queue
//! and makes no delivery guarantee beyond emission.

use tokio::sync::broadcast;

/// Events emitted during request execution.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CrawlEvent {
    /// A derived request discovered during extraction.
    /// `depth` is always the referrer's depth plus one.
    NewRequestDiscovered {
        url: String,
        referrer: String,
        depth: u32,
    },
    /// A page snapshot captured on demand during extraction.
    SnapshotCaptured {
        url: String,
        html: String,
        screenshot: Vec<u8>,
    },
}

/// Broadcast bus for crawl events. Subscribe before `Crawler::start`.
pub struct EventBus {
    tx: broadcast::Sender<CrawlEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: CrawlEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CrawlEvent::NewRequestDiscovered {
            url: "http://example.com/next".into(),
            referrer: "http://example.com/".into(),
            depth: 1,
        });

        match rx.recv().await {
            Ok(CrawlEvent::NewRequestDiscovered { depth, .. }) => assert_eq!(depth, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(CrawlEvent::SnapshotCaptured {
            url: "http://example.com/".into(),
            html: "<html></html>".into(),
            screenshot: vec![],
        });
    }
}
