use serde::ser::{Serialize, SerializeMap, Serializer};

use super::dedup::{ResourceRecord, ResourceSet};
use crate::net::fetch::FetchedSize;

/// Final sizes for one resource.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MeasurementResult {
    #[serde(skip)]
    pub url: String,
    /// Browser estimate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phantom_size: Option<u64>,
    /// Bytes on the wire.
    pub encoded_size: u64,
    /// Bytes after decoding.
    pub actual_size: u64,
}

/// Per-URL report for one run, in first-seen order.
///
/// Serializes to `{ url: { phantom_size, encoded_size, actual_size } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    results: Vec<MeasurementResult>,
}

impl Report {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&MeasurementResult> {
        self.results.iter().find(|r| r.url == url)
    }

    pub fn results(&self) -> &[MeasurementResult] {
        &self.results
    }

    /// Total bytes on the wire across all resources.
    pub fn total_encoded(&self) -> u64 {
        self.results.iter().map(|r| r.encoded_size).sum()
    }

    /// Total decoded bytes across all resources.
    pub fn total_actual(&self) -> u64 {
        self.results.iter().map(|r| r.actual_size).sum()
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len()))?;
        for result in &self.results {
            map.serialize_entry(&result.url, result)?;
        }
        map.end()
    }
}

/// Attach fetched sizes to their records.
///
/// A fetch whose URL has no record gets an empty one instead of failing.
pub fn merge(records: &ResourceSet, fetched: Vec<FetchedSize>) -> Report {
    let results = fetched
        .into_iter()
        .map(|size| {
            let record = match records.get(&size.url) {
                Some(record) => record.clone(),
                None => {
                    log::warn!("No record for fetched resource {}", size.url);
                    ResourceRecord::empty(size.url.clone())
                }
            };
            MeasurementResult {
                phantom_size: record.phantom_size,
                encoded_size: size.encoded_size(),
                actual_size: size.actual_size(),
                url: record.url,
            }
        })
        .collect();

    Report { results }
}
