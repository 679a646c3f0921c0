//! Crawler facade
//!
//! Wires the session pool, the event bus and the request executor together
//! behind the three inbound operations: `start`, `crawl`, `shutdown`.

use std::sync::Arc;
use std::sync::OnceLock;

use tokio::sync::broadcast;
use tracing::info;

use crate::agent::{ExtractionFn, InterceptionPolicy, SessionLauncher};
use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::events::{CrawlEvent, EventBus};
use crate::executor::RequestExecutor;
use crate::pool::{PoolStats, SessionPool, StatsHook};
use crate::request::CrawlRequest;

pub struct Crawler {
    config: Arc<CrawlerConfig>,
    pool: Arc<SessionPool>,
    events: Arc<EventBus>,
    extraction: ExtractionFn,
    interception: Option<InterceptionPolicy>,
    stats_hook: Option<StatsHook>,
    executor: OnceLock<RequestExecutor>,
}

impl Crawler {
    /// Create a crawler. Fails with a configuration error when the capacity
    /// invariant does not hold.
    pub fn new(
        config: CrawlerConfig,
        launcher: Arc<dyn SessionLauncher>,
        extraction: ExtractionFn,
    ) -> Result<Self, CrawlError> {
        let config = Arc::new(config);
        let pool = Arc::new(SessionPool::new(Arc::clone(&config), launcher)?);

        Ok(Self {
            config,
            pool,
            events: Arc::new(EventBus::new()),
            extraction,
            interception: None,
            stats_hook: None,
            executor: OnceLock::new(),
        })
    }

    /// Forward a request-blocking policy to pages when interception is
    /// enabled.
    pub fn with_interception_policy(mut self, policy: InterceptionPolicy) -> Self {
        self.interception = Some(policy);
        self
    }

    /// Invoke `hook` with a pool snapshot on the configured stats interval.
    pub fn with_stats_hook(mut self, hook: StatsHook) -> Self {
        self.stats_hook = Some(hook);
        self
    }

    /// Subscribe to crawl events. Subscribe before `start` so no discovery
    /// or snapshot is missed.
    pub fn events(&self) -> broadcast::Receiver<CrawlEvent> {
        self.events.subscribe()
    }

    /// Launch all sessions and start the stats monitor.
    pub async fn start(&self) {
        self.executor.get_or_init(|| {
            RequestExecutor::new(
                Arc::clone(&self.config),
                Arc::clone(&self.pool),
                Arc::clone(&self.events),
                self.extraction.clone(),
                self.interception.clone(),
            )
        });
        self.pool.start().await;
        self.pool.start_stats_monitor(self.stats_hook.clone());
        info!("Crawler started");
    }

    /// Drive one request through the pipeline. The request is mutated in
    /// place; any failure surfaces here after cleanup, and retry/log/drop
    /// decisions belong to the caller.
    pub async fn crawl(&self, request: Arc<CrawlRequest>) -> Result<(), CrawlError> {
        request.validate()?;
        let executor = self
            .executor
            .get()
            .ok_or_else(|| CrawlError::Configuration("crawler has not been started".into()))?;

        let slot = self.pool.select_slot().await;
        executor.execute(slot, request).await
    }

    /// Close every session, best effort, and stop the stats monitor.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Snapshot of the pool's counters.
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }
}
