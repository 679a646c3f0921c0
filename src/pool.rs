//! Browser session pool
//!
//! Owns a fixed array of session slots, picks which slot serves the next
//! request via round-robin selection, and relaunches a slot once it has
//! served its request budget so the egress identity rotates.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::{BrowserSession, LaunchOptions, SessionLauncher};
use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::proxy::ProxyRotation;

/// Invoked by the periodic stats monitor with the current pool snapshot.
pub type StatsHook = Arc<dyn Fn(PoolStats) + Send + Sync>;

/// One pool slot. The session handle is replaceable; the counters outlive
/// any individual session.
struct Slot {
    session: RwLock<Option<Arc<dyn BrowserSession>>>,
    /// Requests served by the current session. Reset on relaunch.
    total_served: AtomicU64,
    /// Requests currently executing against this slot. Never negative:
    /// incremented on dispatch, decremented exactly once per completion.
    in_flight: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            session: RwLock::new(None),
            total_served: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }
}

/// Fixed-size pool of browser sessions with budget-based rotation.
pub struct SessionPool {
    config: Arc<CrawlerConfig>,
    launcher: Arc<dyn SessionLauncher>,
    proxies: ProxyRotation,
    slots: Vec<Slot>,
    /// Monotonic round-robin cursor, wrapping modulo the slot count.
    cursor: AtomicUsize,
    relaunches: AtomicU64,
    monitor_running: Arc<AtomicBool>,
}

impl SessionPool {
    /// Create a pool. Fails when the capacity invariant does not hold.
    pub fn new(
        config: Arc<CrawlerConfig>,
        launcher: Arc<dyn SessionLauncher>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;

        let slots = (0..config.session_count).map(|_| Slot::new()).collect();
        let proxies = ProxyRotation::new(config.proxy_list.clone());

        Ok(Self {
            config,
            launcher,
            proxies,
            slots,
            cursor: AtomicUsize::new(0),
            relaunches: AtomicU64::new(0),
            monitor_running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn launch_options(&self, slot: usize) -> LaunchOptions {
        LaunchOptions {
            slot,
            proxy: self.proxies.next(),
            user_agent: self.config.user_agent.clone(),
        }
    }

    /// Launch all sessions concurrently. A slot whose launch fails stays
    /// empty; the failure is logged here and resurfaces as a launch error
    /// on the first crawl that uses the slot.
    pub async fn start(&self) {
        info!(
            "Starting session pool: {} sessions, {} requests per session",
            self.config.session_count, self.config.max_requests_per_session
        );

        let launches = (0..self.slots.len()).map(|i| {
            let opts = self.launch_options(i);
            async move { (i, self.launcher.launch(&opts).await) }
        });

        for (i, result) in join_all(launches).await {
            match result {
                Ok(session) => {
                    *self.slots[i].session.write().await = Some(session);
                    debug!("Session slot {} launched", i);
                }
                Err(e) => {
                    warn!("Session slot {} failed to launch: {}", i, e);
                }
            }
        }
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Pick the slot that serves the next request.
    ///
    /// Round-robin over the wrapping cursor, with three overrides: a slot
    /// with remaining budget is taken as-is; an exhausted idle slot is
    /// relaunched and taken; and when every slot is simultaneously exhausted
    /// and busy the pool degrades to slot 0 instead of livelocking, at the
    /// cost of a transient breach of the per-session budget.
    pub async fn select_slot(&self) -> usize {
        let max = self.config.max_requests_per_session;
        loop {
            let pos = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
            let slot = &self.slots[pos];

            if slot.total_served.load(Ordering::Relaxed) < max {
                return pos;
            }

            if slot.in_flight.load(Ordering::Relaxed) == 0 {
                self.relaunch(pos).await;
                return pos;
            }

            let saturated = self
                .slots
                .iter()
                .all(|s| s.total_served.load(Ordering::Relaxed) >= max)
                && self
                    .slots
                    .iter()
                    .all(|s| s.in_flight.load(Ordering::Relaxed) > 0);
            if saturated {
                warn!(
                    "Pool saturated ({} slots exhausted and busy); degrading to slot 0 over budget",
                    self.slots.len()
                );
                return 0;
            }
            // Another slot may have budget or be idle; keep looking.
        }
    }

    /// Replace the slot's session with a fresh launch and reset its served
    /// counter. The old handle is closed asynchronously so selection never
    /// blocks on teardown; a failed relaunch leaves the old handle in place
    /// for the next attempt to contend with.
    async fn relaunch(&self, pos: usize) {
        let opts = self.launch_options(pos);
        match self.launcher.launch(&opts).await {
            Ok(new_session) => {
                let old = self.slots[pos].session.write().await.replace(new_session);
                self.slots[pos].total_served.store(0, Ordering::Relaxed);
                self.relaunches.fetch_add(1, Ordering::Relaxed);
                info!("Session slot {} relaunched (budget reset)", pos);

                if let Some(old) = old {
                    tokio::spawn(async move {
                        if let Err(e) = old.close().await {
                            warn!("Closing rotated-out session failed: {}", e);
                        }
                    });
                }
            }
            Err(e) => {
                warn!(
                    "Session slot {} relaunch failed, keeping previous session: {}",
                    pos, e
                );
            }
        }
    }

    /// Current session handle for a slot.
    pub async fn session(&self, pos: usize) -> Result<Arc<dyn BrowserSession>, CrawlError> {
        self.slots[pos]
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| CrawlError::Launch(format!("session slot {} has no live session", pos)))
    }

    /// Mark a request dispatched to `pos`. Called before any I/O so
    /// concurrent selection sees accurate load.
    pub fn checkout(&self, pos: usize) {
        self.slots[pos].in_flight.fetch_add(1, Ordering::Relaxed);
        self.slots[pos].total_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Release the in-flight count for `pos`. Called exactly once per
    /// dispatch, on every exit path.
    pub fn checkin(&self, pos: usize) {
        self.slots[pos].in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Requests currently in flight against `pos`.
    pub fn in_flight(&self, pos: usize) -> usize {
        self.slots[pos].in_flight.load(Ordering::Relaxed)
    }

    /// Requests served by the current session in `pos`.
    pub fn total_served(&self, pos: usize) -> u64 {
        self.slots[pos].total_served.load(Ordering::Relaxed)
    }

    /// Close every session, best effort. Close failures are logged and do
    /// not abort shutdown. Also stops the stats monitor.
    pub async fn shutdown(&self) {
        self.monitor_running.store(false, Ordering::Relaxed);

        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(session) = slot.session.write().await.take() {
                if let Err(e) = session.close().await {
                    warn!("Closing session slot {} failed: {}", i, e);
                }
            }
        }
        info!("Session pool shut down");
    }

    /// Snapshot of current pool counters.
    pub async fn stats(&self) -> PoolStats {
        let mut slots = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.iter().enumerate() {
            slots.push(SlotStats {
                slot: i,
                total_served: slot.total_served.load(Ordering::Relaxed),
                in_flight: slot.in_flight.load(Ordering::Relaxed),
                live: slot.session.read().await.is_some(),
            });
        }
        PoolStats {
            session_count: self.slots.len(),
            in_flight: slots.iter().map(|s| s.in_flight).sum(),
            total_served: slots.iter().map(|s| s.total_served).sum(),
            relaunches: self.relaunches.load(Ordering::Relaxed),
            slots,
        }
    }

    /// Spawn the periodic stats monitor if an interval is configured.
    /// The task stops when the pool shuts down.
    pub fn start_stats_monitor(self: &Arc<Self>, hook: Option<StatsHook>) {
        let Some(interval) = self.config.stats_interval else {
            return;
        };

        self.monitor_running.store(true, Ordering::Relaxed);
        let pool = Arc::clone(self);
        let running = Arc::clone(&self.monitor_running);

        tokio::spawn(async move {
            while running.load(Ordering::Relaxed) {
                tokio::time::sleep(interval).await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let stats = pool.stats().await;
                debug!(
                    "Pool stats: {} in flight, {} served, {} relaunches",
                    stats.in_flight, stats.total_served, stats.relaunches
                );
                if let Some(hook) = &hook {
                    hook(stats);
                }
            }
            debug!("Pool stats monitor stopped");
        });
    }
}

/// Per-slot counter snapshot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStats {
    pub slot: usize,
    pub total_served: u64,
    pub in_flight: usize,
    pub live: bool,
}

/// Pool-wide counter snapshot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub session_count: usize,
    pub in_flight: usize,
    pub total_served: u64,
    pub relaunches: u64,
    pub slots: Vec<SlotStats>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use async_trait::async_trait;

    use super::*;
    use crate::agent::PageAgent;

    struct NullSession;

    #[async_trait]
    impl BrowserSession for NullSession {
        async fn open_page(&self) -> Result<Arc<dyn PageAgent>, CrawlError> {
            Err(CrawlError::Page("no pages in null session".into()))
        }

        async fn close(&self) -> Result<(), CrawlError> {
            Ok(())
        }
    }

    struct CountingLauncher {
        launches: AtomicU64,
        proxies_seen: parking_lot::Mutex<Vec<Option<String>>>,
    }

    impl CountingLauncher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                launches: AtomicU64::new(0),
                proxies_seen: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionLauncher for CountingLauncher {
        async fn launch(
            &self,
            opts: &LaunchOptions,
        ) -> Result<Arc<dyn BrowserSession>, CrawlError> {
            self.launches.fetch_add(1, Ordering::Relaxed);
            self.proxies_seen.lock().push(opts.proxy.clone());
            Ok(Arc::new(NullSession))
        }
    }

    fn pool_with(config: CrawlerConfig) -> (Arc<SessionPool>, Arc<CountingLauncher>) {
        let launcher = CountingLauncher::new();
        let pool = SessionPool::new(Arc::new(config), launcher.clone()).unwrap();
        (Arc::new(pool), launcher)
    }

    #[tokio::test]
    async fn start_launches_every_slot() {
        let (pool, launcher) = pool_with(CrawlerConfig::new(3, 10, 5));
        pool.start().await;
        assert_eq!(launcher.launches.load(Ordering::Relaxed), 3);
        for i in 0..3 {
            assert!(pool.session(i).await.is_ok());
        }
    }

    #[tokio::test]
    async fn round_robin_visits_each_slot_once() {
        let (pool, _) = pool_with(CrawlerConfig::new(4, 10, 5));
        pool.start().await;

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(pool.select_slot().await);
        }
        assert_eq!(order, vec![0, 1, 2, 3]);

        // and again, cyclically
        assert_eq!(pool.select_slot().await, 0);
    }

    #[tokio::test]
    async fn exhausted_idle_slot_is_relaunched() {
        let (pool, launcher) = pool_with(CrawlerConfig::new(2, 2, 2));
        pool.start().await;
        assert_eq!(launcher.launches.load(Ordering::Relaxed), 2);

        // Exhaust slot 0's budget with no in-flight work.
        pool.checkout(0);
        pool.checkin(0);
        pool.checkout(0);
        pool.checkin(0);
        assert_eq!(pool.total_served(0), 2);

        // Cursor starts at slot 0: exhausted and idle, so it relaunches.
        let pos = pool.select_slot().await;
        assert_eq!(pos, 0);
        assert_eq!(pool.total_served(0), 0);
        assert_eq!(launcher.launches.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhausted_busy_slot_is_skipped() {
        let (pool, launcher) = pool_with(CrawlerConfig::new(2, 1, 2));
        pool.start().await;

        // Slot 0 exhausted and busy; slot 1 has budget.
        pool.checkout(0);

        let pos = pool.select_slot().await;
        assert_eq!(pos, 1);
        // no relaunch happened
        assert_eq!(launcher.launches.load(Ordering::Relaxed), 2);
        assert_eq!(pool.total_served(0), 1);
    }

    #[tokio::test]
    async fn saturated_pool_degrades_to_slot_zero() {
        let (pool, launcher) = pool_with(CrawlerConfig::new(3, 1, 3));
        pool.start().await;

        // Every slot exhausted and busy.
        for i in 0..3 {
            pool.checkout(i);
        }

        assert_eq!(pool.select_slot().await, 0);
        assert_eq!(launcher.launches.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn launch_proxies_follow_rotation_cursor() {
        let config = CrawlerConfig::new(3, 10, 5)
            .proxy_list(vec!["http://p0".into(), "http://p1".into()]);
        let (pool, launcher) = pool_with(config);
        pool.start().await;

        let seen = launcher.proxies_seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                Some("http://p0".to_string()),
                Some("http://p1".to_string()),
                Some("http://p0".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_clears_sessions() {
        let (pool, _) = pool_with(CrawlerConfig::new(2, 10, 5));
        pool.start().await;
        pool.shutdown().await;
        assert!(pool.session(0).await.is_err());
        assert!(pool.session(1).await.is_err());
    }

    #[tokio::test]
    async fn stats_reflect_counters() {
        let (pool, _) = pool_with(CrawlerConfig::new(2, 10, 5));
        pool.start().await;
        pool.checkout(1);

        let stats = pool.stats().await;
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.total_served, 1);
        assert!(stats.slots[0].live && stats.slots[1].live);
    }
}
