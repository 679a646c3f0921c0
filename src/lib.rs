//! crawlpool
//!
//! A headless-browser crawling core: page-visit requests are distributed
//! across a bounded pool of browser sessions, each request runs through a
//! setup/extraction pipeline with a hard wall-clock deadline, and discovered
//! links and captured snapshots are emitted as typed events.
//!
//! The concrete browser automation is pluggable: implement the capability
//! traits in [`agent`] and hand a [`agent::SessionLauncher`] to
//! [`Crawler::new`]. This crate decides which session serves a request,
//! rotates sessions to refresh egress identity, enforces capacity and
//! liveness limits, and guarantees page and counter cleanup under success,
//! timeout and crash. It does not parse pages, decide crawl policy, or
//! persist anything.

pub mod agent;
pub mod config;
pub mod crawler;
pub mod error;
pub mod events;
pub mod executor;
pub mod pool;
pub mod proxy;
pub mod request;

pub use agent::{
    BrowserSession, CrashHandler, EnqueuedLink, ExtractionContext, ExtractionFn,
    InterceptionPolicy, LaunchOptions, PageAgent, PageCallbacks, PageResponse, ResponseHandler,
    SessionLauncher, WaitPolicy,
};
pub use config::{Cookie, CrawlerConfig, ScrollConfig, DEFAULT_PAGE_TIMEOUT};
pub use crawler::Crawler;
pub use error::CrawlError;
pub use events::{CrawlEvent, EventBus};
pub use pool::{PoolStats, SessionPool, SlotStats, StatsHook};
pub use request::{CrawlRequest, RequestSnapshot};
