//! Browser automation capability
//!
//! The pool and executor never talk to a real browser. Everything they need
//! from one is expressed here as object-safe traits: launching a session,
//! opening a page, and the page-level operations the pipeline drives. The
//! concrete automation (CDP client, WebDriver, an in-memory fake in tests)
//! lives behind these seams.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::config::Cookie;
use crate::error::CrawlError;
use crate::request::CrawlRequest;

/// Options for launching one browser session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Pool slot the session will occupy.
    pub slot: usize,
    /// Proxy URL from the rotation cursor, if any are configured.
    pub proxy: Option<String>,
    /// User agent applied to the whole session.
    pub user_agent: Option<String>,
}

/// How `goto` decides a navigation is complete.
#[derive(Debug, Clone, Copy)]
pub enum WaitPolicy {
    /// The load event fired.
    Load,
    /// No more than `max_inflight` network connections for `quiet`.
    NetworkIdle {
        max_inflight: usize,
        quiet: Duration,
    },
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::NetworkIdle {
            max_inflight: 2,
            quiet: Duration::from_millis(500),
        }
    }
}

/// One network response observed by the page.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body_len: u64,
}

/// Invoked for every network response after navigation begins.
pub type ResponseHandler = Arc<dyn Fn(PageResponse) + Send + Sync>;

/// Invoked at most once if the page reports a fatal error asynchronously.
pub type CrashHandler = Box<dyn FnOnce(String) + Send>;

/// Returns false for request URLs the agent should block.
pub type InterceptionPolicy = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A link handed to `enqueue_page` / `new_request_from` by page code.
/// Any explicit depth is ignored: the emitted event always carries the
/// originating request's depth plus one.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedLink {
    pub url: String,
    #[serde(default)]
    pub depth: Option<u32>,
}

/// The fixed, closed set of callbacks exposed to page-executed code.
#[derive(Clone)]
pub struct PageCallbacks {
    pub enqueue_page: Arc<dyn Fn(EnqueuedLink) + Send + Sync>,
    pub new_request_from: Arc<dyn Fn(EnqueuedLink) + Send + Sync>,
    pub save_snapshot: Arc<dyn Fn() + Send + Sync>,
    pub skip_output: Arc<dyn Fn() + Send + Sync>,
}

/// Everything the extraction function sees besides the page itself.
pub struct ExtractionContext {
    pub request: Arc<CrawlRequest>,
    pub custom_data: serde_json::Value,
    pub callbacks: PageCallbacks,
}

/// Caller-supplied extraction logic, run against the page by the agent.
pub type ExtractionFn = Arc<
    dyn for<'a> Fn(
            &'a dyn PageAgent,
            &'a ExtractionContext,
        ) -> BoxFuture<'a, Result<serde_json::Value, CrawlError>>
        + Send
        + Sync,
>;

/// Launches browser sessions. One launcher serves the whole pool.
#[async_trait]
pub trait SessionLauncher: Send + Sync + 'static {
    async fn launch(&self, opts: &LaunchOptions) -> Result<Arc<dyn BrowserSession>, CrawlError>;
}

/// A live browser session owned by one pool slot.
#[async_trait]
pub trait BrowserSession: Send + Sync + 'static {
    async fn open_page(&self) -> Result<Arc<dyn PageAgent>, CrawlError>;
    async fn close(&self) -> Result<(), CrawlError>;
}

/// One open page and the operations the pipeline drives on it.
#[async_trait]
pub trait PageAgent: Send + Sync + 'static {
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), CrawlError>;

    /// Enable request interception with the given policy, or disable it
    /// when `policy` is None.
    async fn set_interception(&self, policy: Option<InterceptionPolicy>) -> Result<(), CrawlError>;

    /// Register the observer for network responses. Must be wired before
    /// `goto` so the first response is not missed.
    fn on_response(&self, handler: ResponseHandler);

    /// Register the handler for an asynchronous fatal page error.
    fn on_crash(&self, handler: CrashHandler);

    async fn goto(&self, url: &str, wait: WaitPolicy) -> Result<(), CrawlError>;

    /// Inject context variables into page scope.
    async fn inject_context(&self, vars: serde_json::Value) -> Result<(), CrawlError>;

    /// Expose the closed callback set to page-executed code.
    async fn expose_functions(&self, callbacks: PageCallbacks) -> Result<(), CrawlError>;

    async fn wait_for_body(&self) -> Result<(), CrawlError>;

    async fn scroll(&self, max_height: u32) -> Result<(), CrawlError>;

    async fn inject_script(&self, src: &str) -> Result<(), CrawlError>;

    async fn click(&self, selector: &str) -> Result<(), CrawlError>;

    /// Run the extraction function inside the page context.
    async fn run_extraction(
        &self,
        extraction: &ExtractionFn,
        ctx: &ExtractionContext,
    ) -> Result<serde_json::Value, CrawlError>;

    /// Final page HTML.
    async fn content(&self) -> Result<String, CrawlError>;

    async fn screenshot(&self) -> Result<Vec<u8>, CrawlError>;

    async fn current_url(&self) -> Result<String, CrawlError>;

    async fn close(&self) -> Result<(), CrawlError>;
}
