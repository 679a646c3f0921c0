//! Per-request execution pipeline
//!
//! Drives one request against a chosen session slot: open a page, arm the
//! crash handler and the wall-clock deadline, seed cookies and interception,
//! navigate, run the concurrent setup pipeline, extract, flush deferred
//! snapshots, and release the page and the slot's in-flight counter on every
//! exit path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::agent::{
    EnqueuedLink, ExtractionContext, ExtractionFn, InterceptionPolicy, PageAgent, PageCallbacks,
    PageResponse, WaitPolicy,
};
use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::events::{CrawlEvent, EventBus};
use crate::pool::SessionPool;
use crate::request::CrawlRequest;

pub struct RequestExecutor {
    config: Arc<CrawlerConfig>,
    pool: Arc<SessionPool>,
    events: Arc<EventBus>,
    extraction: ExtractionFn,
    interception: Option<InterceptionPolicy>,
}

impl RequestExecutor {
    pub fn new(
        config: Arc<CrawlerConfig>,
        pool: Arc<SessionPool>,
        events: Arc<EventBus>,
        extraction: ExtractionFn,
        interception: Option<InterceptionPolicy>,
    ) -> Self {
        Self {
            config,
            pool,
            events,
            extraction,
            interception,
        }
    }

    /// Execute one request against `slot`.
    ///
    /// The in-flight and served counters are bumped before any I/O so
    /// concurrent selection sees accurate load, and the in-flight counter is
    /// released exactly once on every exit path. Failures are re-raised to
    /// the caller after cleanup; nothing is retried here.
    pub async fn execute(&self, slot: usize, request: Arc<CrawlRequest>) -> Result<(), CrawlError> {
        self.pool.checkout(slot);
        *request.requested_at.write() = Some(Utc::now());

        let result = self.run(slot, &request).await;

        self.pool.checkin(slot);
        if let Err(e) = &result {
            debug!("Request {} failed on slot {}: {}", request.id, slot, e);
        }
        result
    }

    async fn run(&self, slot: usize, request: &Arc<CrawlRequest>) -> Result<(), CrawlError> {
        let session = self.pool.session(slot).await?;
        let page = session.open_page().await?;

        // A fatal page event terminates the execution through this channel.
        let (crash_tx, crash_rx) = oneshot::channel::<String>();
        page.on_crash(Box::new(move |msg| {
            let _ = crash_tx.send(msg);
        }));

        let deadline = self.config.page_timeout;
        let result = tokio::select! {
            res = self.pipeline(&page, request) => res,
            msg = crash_signal(crash_rx) => Err(CrawlError::PageCrash(msg)),
            _ = tokio::time::sleep(deadline) => Err(CrawlError::Navigation(format!(
                "page deadline of {}ms exceeded, page force-closed",
                deadline.as_millis()
            ))),
        };

        // The page opened for this execution is closed exactly once, on
        // success, error, crash and deadline alike. A close failure is
        // reported but never masks the pipeline's own outcome.
        if let Err(e) = page.close().await {
            warn!("Closing page for request {} failed: {}", request.id, e);
        }

        result
    }

    async fn pipeline(
        &self,
        page: &Arc<dyn PageAgent>,
        request: &Arc<CrawlRequest>,
    ) -> Result<(), CrawlError> {
        if !self.config.cookies.is_empty() {
            page.set_cookies(&self.config.cookies).await?;
        }
        if let Some(policy) = &self.interception {
            page.set_interception(Some(policy.clone())).await?;
        }

        // Response observer must be wired before navigation begins: the
        // first observed response, document or asset, contributes status and
        // headers; every response contributes its body length.
        let observed = Arc::clone(request);
        page.on_response(Arc::new(move |resp: PageResponse| {
            observed.record_response(resp.status, &resp.headers, resp.body_len);
        }));

        *request.load_started_at.write() = Some(Utc::now());
        page.goto(&request.url, WaitPolicy::default())
            .await
            .map_err(as_navigation)?;
        *request.load_finished_at.write() = Some(Utc::now());

        let pending_snapshots = Arc::new(AtomicUsize::new(0));
        let callbacks = self.build_callbacks(request, &pending_snapshots);

        let context_vars = serde_json::json!({
            "request": request.snapshot(),
            "customData": self.config.custom_data,
            "referrer": request.referrer,
            "depth": request.depth,
        });

        // Setup tasks run concurrently; all must finish before extraction
        // starts, and any one failing aborts the whole execution. Scripts
        // inject in declaration order, then the scroll runs, inside one
        // branch of the join.
        tokio::try_join!(
            page.wait_for_body(),
            page.inject_context(context_vars),
            page.expose_functions(callbacks.clone()),
            async {
                for src in &self.config.auxiliary_scripts {
                    page.inject_script(src).await?;
                }
                if let Some(scroll) = self.config.scroll {
                    page.scroll(scroll.max_height).await?;
                }
                Ok::<(), CrawlError>(())
            },
        )
        .map_err(as_pipeline)?;

        if let Some(selector) = &self.config.click_selector {
            page.click(selector).await.map_err(as_pipeline)?;
        }

        let ctx = ExtractionContext {
            request: Arc::clone(request),
            custom_data: self.config.custom_data.clone(),
            callbacks,
        };

        *request.extraction_started_at.write() = Some(Utc::now());
        let value = page
            .run_extraction(&self.extraction, &ctx)
            .await
            .map_err(as_pipeline)?;
        *request.extraction_finished_at.write() = Some(Utc::now());
        *request.extraction_result.write() = Some(value);

        // Deferred actions registered during extraction run before this
        // execution resolves: one snapshot capture per save_snapshot call.
        let snapshots = pending_snapshots.swap(0, Ordering::Relaxed);
        for _ in 0..snapshots {
            let url = page.current_url().await.map_err(as_pipeline)?;
            let html = page.content().await.map_err(as_pipeline)?;
            let screenshot = page.screenshot().await.map_err(as_pipeline)?;
            self.events.publish(CrawlEvent::SnapshotCaptured {
                url,
                html,
                screenshot,
            });
        }

        Ok(())
    }

    /// The fixed, closed callback set exposed to page-executed code.
    fn build_callbacks(
        &self,
        request: &Arc<CrawlRequest>,
        pending_snapshots: &Arc<AtomicUsize>,
    ) -> PageCallbacks {
        let discover = {
            let events = Arc::clone(&self.events);
            let referrer_url = request.url.clone();
            let depth = request.depth;
            Arc::new(move |link: EnqueuedLink| {
                // Depth is derived from the referrer, never trusted from
                // page code.
                events.publish(CrawlEvent::NewRequestDiscovered {
                    url: link.url,
                    referrer: referrer_url.clone(),
                    depth: depth + 1,
                });
            })
        };

        let save_snapshot = {
            let pending = Arc::clone(pending_snapshots);
            Arc::new(move || {
                pending.fetch_add(1, Ordering::Relaxed);
            })
        };

        let skip_output = {
            let request = Arc::clone(request);
            Arc::new(move || {
                request.mark_skip_output();
            })
        };

        PageCallbacks {
            enqueue_page: discover.clone(),
            new_request_from: discover,
            save_snapshot,
            skip_output,
        }
    }
}

/// Resolves only if the page actually crashed; pends forever when the
/// handler is dropped without firing.
async fn crash_signal(rx: oneshot::Receiver<String>) -> String {
    match rx.await {
        Ok(msg) => msg,
        Err(_) => std::future::pending().await,
    }
}

fn as_navigation(e: CrawlError) -> CrawlError {
    match e {
        CrawlError::Page(msg) => CrawlError::Navigation(msg),
        other => other,
    }
}

fn as_pipeline(e: CrawlError) -> CrawlError {
    match e {
        CrawlError::Page(msg) => CrawlError::Pipeline(msg),
        other => other,
    }
}
