//! Crawler configuration
//!
//! Built once, immutable for the pool's lifetime. Construction validates the
//! capacity invariant so a pool that can structurally never satisfy its
//! declared concurrency target is rejected up front.

use std::time::Duration;

use crate::error::CrawlError;

/// Default hard wall-clock deadline per request (10 minutes).
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_millis(600_000);

/// A cookie seeded into every page before navigation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Bounded infinite-scroll settings.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollConfig {
    /// Maximum page height to scroll to, in pixels.
    pub max_height: u32,
}

/// Configuration for the session pool and the per-request pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    /// Number of browser sessions the pool owns.
    pub session_count: usize,
    /// Requests a session serves before it is relaunched to rotate its
    /// egress identity.
    pub max_requests_per_session: u64,
    /// Declared concurrency target across the whole pool.
    pub max_in_flight_requests: usize,
    /// Hard per-request deadline. On expiry the page is forcibly closed.
    #[serde(default = "default_page_timeout_ms", with = "duration_ms")]
    pub page_timeout: Duration,
    /// Proxy URLs rotated across session launches. May be empty.
    #[serde(default)]
    pub proxy_list: Vec<String>,
    /// User agent applied to every session.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Cookies seeded into each page before navigation.
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    /// Opaque caller data injected into page scope alongside the request.
    #[serde(default)]
    pub custom_data: serde_json::Value,
    /// Bounded infinite scrolling after page setup, if set.
    #[serde(default)]
    pub scroll: Option<ScrollConfig>,
    /// Auxiliary script sources injected during page setup.
    #[serde(default)]
    pub auxiliary_scripts: Vec<String>,
    /// Selector clicked after setup completes, if set.
    #[serde(default)]
    pub click_selector: Option<String>,
    /// Cadence of the periodic stats hook. None disables the monitor.
    #[serde(default, with = "opt_duration_ms")]
    pub stats_interval: Option<Duration>,
}

fn default_page_timeout_ms() -> Duration {
    DEFAULT_PAGE_TIMEOUT
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            session_count: 1,
            max_requests_per_session: 100,
            max_in_flight_requests: 1,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            proxy_list: Vec::new(),
            user_agent: None,
            cookies: Vec::new(),
            custom_data: serde_json::Value::Null,
            scroll: None,
            auxiliary_scripts: Vec::new(),
            click_selector: None,
            stats_interval: None,
        }
    }
}

impl CrawlerConfig {
    /// Create a config with the three capacity knobs set.
    pub fn new(
        session_count: usize,
        max_requests_per_session: u64,
        max_in_flight_requests: usize,
    ) -> Self {
        Self {
            session_count,
            max_requests_per_session,
            max_in_flight_requests,
            ..Default::default()
        }
    }

    /// Set the per-request deadline.
    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Set the proxy list rotated across session launches.
    pub fn proxy_list(mut self, proxies: Vec<String>) -> Self {
        self.proxy_list = proxies;
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set cookies seeded before navigation.
    pub fn cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Set opaque caller data injected into page scope.
    pub fn custom_data(mut self, data: serde_json::Value) -> Self {
        self.custom_data = data;
        self
    }

    /// Enable bounded infinite scrolling.
    pub fn scroll(mut self, max_height: u32) -> Self {
        self.scroll = Some(ScrollConfig { max_height });
        self
    }

    /// Add auxiliary scripts injected during setup.
    pub fn auxiliary_scripts(mut self, scripts: Vec<String>) -> Self {
        self.auxiliary_scripts = scripts;
        self
    }

    /// Set the selector clicked after setup.
    pub fn click_selector(mut self, selector: impl Into<String>) -> Self {
        self.click_selector = Some(selector.into());
        self
    }

    /// Enable the periodic stats hook.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    /// Validate construction-time invariants.
    ///
    /// `session_count * max_requests_per_session` must cover
    /// `max_in_flight_requests`, otherwise the pool can never reach its
    /// declared concurrency target.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.session_count == 0 {
            return Err(CrawlError::Configuration(
                "sessionCount must be at least 1".to_string(),
            ));
        }
        if self.max_requests_per_session == 0 {
            return Err(CrawlError::Configuration(
                "maxRequestsPerSession must be at least 1".to_string(),
            ));
        }
        let capacity = (self.session_count as u64).saturating_mul(self.max_requests_per_session);
        if capacity < self.max_in_flight_requests as u64 {
            return Err(CrawlError::Configuration(format!(
                "sessionCount ({}) * maxRequestsPerSession ({}) must cover maxInFlightRequests ({})",
                self.session_count, self.max_requests_per_session, self.max_in_flight_requests
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
