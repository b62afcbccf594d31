use std::collections::HashMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::ContentTypeFilter;
use crate::observe::ResourceEvent;

/// Canonical per-URL record after filtering.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResourceRecord {
    #[serde(skip)]
    pub url: String,
    /// Size the browser reported, if it reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phantom_size: Option<u64>,
    /// `Content-Encoding` the browser saw on the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl ResourceRecord {
    /// Record with nothing known beyond its URL.
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            phantom_size: None,
            content_encoding: None,
        }
    }

    fn from_event(event: &ResourceEvent) -> Self {
        Self {
            url: event.url.clone(),
            phantom_size: event.body_size,
            content_encoding: event.content_encoding().map(str::to_string),
        }
    }

    /// Fill in fields the first event lacked. Set fields are never replaced.
    fn backfill(&mut self, event: &ResourceEvent) {
        if self.phantom_size.is_none() {
            self.phantom_size = event.body_size;
        }
        if self.content_encoding.is_none() {
            self.content_encoding = event.content_encoding().map(str::to_string);
        }
    }
}

/// Deduplicated records in first-seen order, indexed by URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    records: Vec<ResourceRecord>,
    index: HashMap<String, usize>,
}

impl ResourceSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&ResourceRecord> {
        self.index.get(url).map(|&i| &self.records[i])
    }

    pub fn as_slice(&self) -> &[ResourceRecord] {
        &self.records
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.url.as_str())
    }

    fn get_mut(&mut self, url: &str) -> Option<&mut ResourceRecord> {
        self.index.get(url).map(|&i| &mut self.records[i])
    }

    fn push(&mut self, record: ResourceRecord) {
        self.index.insert(record.url.clone(), self.records.len());
        self.records.push(record);
    }
}

/// Serialized as `{ url: { phantom_size, content_encoding } }`.
impl Serialize for ResourceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.url, record)?;
        }
        map.end()
    }
}

/// Collapses repeated browser events into one record per URL.
///
/// Only events whose content type passes the allow-list count. The first
/// such event for a URL creates the record; later ones can only fill in a
/// missing size or encoding.
pub struct ResourceDeduplicator<'a> {
    filter: &'a ContentTypeFilter,
}

impl<'a> ResourceDeduplicator<'a> {
    pub fn new(filter: &'a ContentTypeFilter) -> Self {
        Self { filter }
    }

    pub fn dedup<'e, I>(&self, events: I) -> ResourceSet
    where
        I: IntoIterator<Item = &'e ResourceEvent>,
    {
        let mut set = ResourceSet::default();
        for event in events {
            if !self.filter.matches(event.content_type.as_deref()) {
                continue;
            }
            match set.get_mut(&event.url) {
                Some(record) => record.backfill(event),
                None => set.push(ResourceRecord::from_event(event)),
            }
        }
        set
    }
}
