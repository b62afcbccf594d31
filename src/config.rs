//! Run configuration.
//!
//! Everything a measurement run depends on is carried in [`MeasureConfig`]
//! and handed to the pipeline explicitly.

use std::time::Duration;

/// Default observation window, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default content-type allow-list.
pub const DEFAULT_CONTENT_TYPES: &str = "application/javascript,text/css";

/// Accept-Encoding header sent with every resource fetch.
pub const DEFAULT_ACCEPT_ENCODING: &str = "gzip,deflate";

/// Allow-list of content-type prefixes.
///
/// A content type matches when it starts with one of the prefixes, so
/// `text/css; charset=utf-8` matches `text/css`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeFilter {
    prefixes: Vec<String>,
}

impl ContentTypeFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list, e.g. `application/javascript,text/css`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim))
    }

    /// Whether `content_type` is allowed. An absent content type never is.
    pub fn matches(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) => self.prefixes.iter().any(|p| ct.starts_with(p.as_str())),
            None => false,
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for ContentTypeFilter {
    fn default() -> Self {
        Self::parse(DEFAULT_CONTENT_TYPES)
    }
}

/// Per-request settings for the resource fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Accept-Encoding value used when no hint is supplied.
    pub accept_encoding: String,
    /// Whole-request deadline. `None` leaves it to the transport.
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            accept_encoding: DEFAULT_ACCEPT_ENCODING.to_string(),
            timeout: None,
        }
    }
}

/// Settings for one measurement run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureConfig {
    /// How long the browser keeps the page open for dynamic loads.
    pub timeout: Duration,
    pub content_types: ContentTypeFilter,
    pub fetch: FetchOptions,
    /// Upper bound on concurrent fetches. `None` runs one worker per resource.
    pub max_concurrency: Option<usize>,
    /// Send the browser-observed Content-Encoding as the Accept-Encoding hint.
    pub use_observed_encoding: bool,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            content_types: ContentTypeFilter::default(),
            fetch: FetchOptions::default(),
            max_concurrency: None,
            use_observed_encoding: false,
        }
    }
}

impl MeasureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_content_types(mut self, content_types: ContentTypeFilter) -> Self {
        self.content_types = content_types;
        self
    }

    pub fn with_accept_encoding(mut self, accept_encoding: impl Into<String>) -> Self {
        self.fetch.accept_encoding = accept_encoding.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch.timeout = timeout;
        self
    }

    /// Bound the fetch fan-out. `Some(0)` is treated as `None`.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max.filter(|n| *n > 0);
        self
    }

    pub fn with_observed_encoding(mut self, enabled: bool) -> Self {
        self.use_observed_encoding = enabled;
        self
    }
}
