//! Crawler error types

use thiserror::Error;

/// Errors surfaced by the pool and the request executor.
///
/// Nothing in this crate retries internally: every failure during an
/// execution is re-raised to the caller after resource cleanup, and the
/// caller decides whether to retry, log or drop the request.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Construction-time invariant violated. Fatal, never retried.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The request URL failed to parse. Rejected before dispatch; no slot
    /// is consumed.
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// A browser session failed to start. Surfaces on first use of the slot.
    #[error("Session launch failed: {0}")]
    Launch(String),

    /// Navigation failed. Includes the forced page close on deadline expiry,
    /// which is indistinguishable from a genuine navigation fault.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// A setup, extraction, click or scroll step failed.
    #[error("Pipeline step failed: {0}")]
    Pipeline(String),

    /// The page reported a fatal error asynchronously.
    #[error("Page crashed: {0}")]
    PageCrash(String),

    /// A page-level operation failed in the automation capability.
    #[error("Page operation failed: {0}")]
    Page(String),
}
