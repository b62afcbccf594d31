use serde::{Deserialize, Serialize};

/// One response header as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// One resource-received event emitted while the page rendered.
///
/// The browser may report the same URL several times (e.g. once when the
/// response starts and once when it ends), so no single event is
/// authoritative. Fields we don't use are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEvent {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub body_size: Option<u64>,
    #[serde(default, deserialize_with = "nullable_headers")]
    pub headers: Vec<Header>,
}

impl ResourceEvent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
            body_size: None,
            headers: Vec::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_body_size(mut self, size: u64) -> Self {
        self.body_size = Some(size);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// First `Content-Encoding` header value, matched case-insensitively.
    pub fn content_encoding(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-encoding"))
            .map(|h| h.value.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

fn nullable_headers<'de, D>(deserializer: D) -> Result<Vec<Header>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Header>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode the collector's raw output as a sequence of events.
pub fn parse_events(raw: &str) -> Result<Vec<ResourceEvent>, serde_json::Error> {
    serde_json::from_str(raw.trim())
}
