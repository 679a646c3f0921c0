//! Crawl request data model
//!
//! A request is caller-owned and shared as `Arc<CrawlRequest>`. The executor
//! mutates its interior fields in place as the pipeline progresses; on
//! failure the already-populated fields stay populated so callers can
//! diagnose how far processing got.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::CrawlError;

/// A single page-visit request.
pub struct CrawlRequest {
    pub id: Uuid,
    pub url: String,
    /// URL of the request this one was discovered from, if any.
    pub referrer: Option<String>,
    /// Link depth from the crawl root.
    pub depth: u32,

    /// When the request was dispatched to a session.
    pub requested_at: RwLock<Option<DateTime<Utc>>>,
    /// When navigation started / the network-idle signal arrived.
    pub load_started_at: RwLock<Option<DateTime<Utc>>>,
    pub load_finished_at: RwLock<Option<DateTime<Utc>>>,
    /// Extraction bracket timestamps.
    pub extraction_started_at: RwLock<Option<DateTime<Utc>>>,
    pub extraction_finished_at: RwLock<Option<DateTime<Utc>>>,

    /// Status and headers of the first network response observed after
    /// navigation begins, document or asset.
    pub first_status: RwLock<Option<u16>>,
    pub first_headers: RwLock<Option<HashMap<String, String>>>,
    first_response_seen: AtomicBool,

    /// Sum of every observed response body length.
    pub downloaded_bytes: AtomicU64,

    /// Value returned by the extraction function.
    pub extraction_result: RwLock<Option<serde_json::Value>>,
    /// Set by the `skip_output` page callback to suppress downstream output.
    pub skip_output: AtomicBool,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            referrer: None,
            depth: 0,
            requested_at: RwLock::new(None),
            load_started_at: RwLock::new(None),
            load_finished_at: RwLock::new(None),
            extraction_started_at: RwLock::new(None),
            extraction_finished_at: RwLock::new(None),
            first_status: RwLock::new(None),
            first_headers: RwLock::new(None),
            first_response_seen: AtomicBool::new(false),
            downloaded_bytes: AtomicU64::new(0),
            extraction_result: RwLock::new(None),
            skip_output: AtomicBool::new(false),
        }
    }

    /// Set the link depth from the crawl root.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Set the URL of the request this one was discovered from.
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Create a derived request one level deeper than `referrer`.
    pub fn derived_from(url: impl Into<String>, referrer: &CrawlRequest) -> Self {
        let mut request = Self::new(url);
        request.referrer = Some(referrer.url.clone());
        request.depth = referrer.depth + 1;
        request
    }

    /// Validate the request URL before dispatch.
    pub fn validate(&self) -> Result<(), CrawlError> {
        url::Url::parse(&self.url)
            .map(|_| ())
            .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", self.url, e)))
    }

    /// Record one network response. The first observed response contributes
    /// its status and headers; every response contributes its body length to
    /// the cumulative byte counter.
    pub fn record_response(&self, status: u16, headers: &HashMap<String, String>, body_len: u64) {
        self.downloaded_bytes.fetch_add(body_len, Ordering::Relaxed);
        if !self.first_response_seen.swap(true, Ordering::Relaxed) {
            *self.first_status.write() = Some(status);
            *self.first_headers.write() = Some(headers.clone());
        }
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }

    pub fn skip_output(&self) -> bool {
        self.skip_output.load(Ordering::Relaxed)
    }

    pub fn mark_skip_output(&self) {
        self.skip_output.store(true, Ordering::Relaxed);
    }

    /// Serializable snapshot of the request's current state.
    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            id: self.id,
            url: self.url.clone(),
            referrer: self.referrer.clone(),
            depth: self.depth,
            requested_at: *self.requested_at.read(),
            load_started_at: *self.load_started_at.read(),
            load_finished_at: *self.load_finished_at.read(),
            extraction_started_at: *self.extraction_started_at.read(),
            extraction_finished_at: *self.extraction_finished_at.read(),
            first_status: *self.first_status.read(),
            downloaded_bytes: self.downloaded_bytes(),
            skip_output: self.skip_output(),
        }
    }
}

/// Serializable view of a request, suitable for injecting into page scope.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub id: Uuid,
    pub url: String,
    pub referrer: Option<String>,
    pub depth: u32,
    pub requested_at: Option<DateTime<Utc>>,
    pub load_started_at: Option<DateTime<Utc>>,
    pub load_finished_at: Option<DateTime<Utc>>,
    pub extraction_started_at: Option<DateTime<Utc>>,
    pub extraction_finished_at: Option<DateTime<Utc>>,
    pub first_status: Option<u16>,
    pub downloaded_bytes: u64,
    pub skip_output: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_request_increments_depth() {
        let mut parent = CrawlRequest::new("http://example.com/");
        parent.depth = 3;
        let child = CrawlRequest::derived_from("http://example.com/next", &parent);
        assert_eq!(child.depth, 4);
        assert_eq!(child.referrer.as_deref(), Some("http://example.com/"));
    }

    #[test]
    fn only_first_response_sets_status() {
        let request = CrawlRequest::new("http://example.com/");
        let headers: HashMap<String, String> =
            [("content-type".to_string(), "text/html".to_string())].into();

        request.record_response(200, &headers, 1000);
        request.record_response(404, &HashMap::new(), 250);

        assert_eq!(*request.first_status.read(), Some(200));
        assert_eq!(
            request.first_headers.read().as_ref().unwrap().get("content-type"),
            Some(&"text/html".to_string())
        );
        assert_eq!(request.downloaded_bytes(), 1250);
    }

    #[test]
    fn invalid_url_fails_validation() {
        let request = CrawlRequest::new("not a url");
        assert!(matches!(
            request.validate(),
            Err(CrawlError::InvalidUrl(_))
        ));
        assert!(CrawlRequest::new("http://example.com/page").validate().is_ok());
    }

    #[test]
    fn snapshot_reflects_partial_progress() {
        let request = CrawlRequest::new("http://example.com/");
        *request.requested_at.write() = Some(Utc::now());
        // load never started

        let snap = request.snapshot();
        assert!(snap.requested_at.is_some());
        assert!(snap.load_started_at.is_none());
        assert!(!snap.skip_output);
    }
}
