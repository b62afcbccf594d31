use rayon::prelude::*;
use thiserror::Error;

use super::dedup::{ResourceDeduplicator, ResourceRecord, ResourceSet};
use super::report::{merge, Report};
use crate::config::MeasureConfig;
use crate::net::fetch::{FetchError, FetchedSize, ResourceFetcher};
use crate::observe::{parse_events, CollectorError, ResourceObserver};

/// Error during a measurement run
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error("could not parse resource events from: {raw} - {source}")]
    Parse {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to measure {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to start fetch workers: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),
}

impl MeasureError {
    /// Stage the run was in when it failed.
    pub fn phase(&self) -> &'static str {
        match self {
            MeasureError::Collector(_) => "observe",
            MeasureError::Parse { .. } => "parse",
            MeasureError::Fetch { .. } | MeasureError::Workers(_) => "measure",
        }
    }
}

/// The measurement pipeline: Observe → Parse → Filter/Dedup → Measure → Merge
///
/// Each stage short-circuits the run on failure. The measure stage fetches
/// every record concurrently and either returns sizes for all of them or
/// the first error; there is no partial report.
pub struct MeasurementPipeline {
    observer: Box<dyn ResourceObserver>,
    config: MeasureConfig,
}

impl MeasurementPipeline {
    pub fn new(observer: impl ResourceObserver + 'static) -> Self {
        Self {
            observer: Box::new(observer),
            config: MeasureConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MeasureConfig) -> Self {
        self.config = config;
        self
    }

    /// Measure every allow-listed resource `url` loads.
    pub fn run(&self, url: &str) -> Result<Report, MeasureError> {
        let records = self.collect(url)?;
        let fetched = self.measure(&records)?;
        let report = merge(&records, fetched);

        log::info!(
            "Measured {} resources for {}: {} bytes encoded, {} bytes actual",
            report.len(),
            url,
            report.total_encoded(),
            report.total_actual()
        );
        Ok(report)
    }

    /// Run only the browser side: no resource is re-fetched.
    pub fn observe_only(&self, url: &str) -> Result<ResourceSet, MeasureError> {
        self.collect(url)
    }

    fn collect(&self, url: &str) -> Result<ResourceSet, MeasureError> {
        // Phase 1: Observe
        let raw = self.observer.observe(url, self.config.timeout)?;

        // Phase 2: Parse
        let events = match parse_events(&raw) {
            Ok(events) => events,
            Err(source) => return Err(MeasureError::Parse { raw, source }),
        };
        log::info!("Observed {} resource events on {}", events.len(), url);

        // Phase 3: Filter + dedup
        let records = ResourceDeduplicator::new(&self.config.content_types).dedup(&events);
        log::info!(
            "{} distinct resources match {:?}",
            records.len(),
            self.config.content_types.prefixes()
        );
        Ok(records)
    }

    /// Phase 4: fetch all records concurrently.
    ///
    /// Without a configured bound every record gets its own worker.
    /// Results come back in record order.
    pub fn measure(&self, records: &ResourceSet) -> Result<Vec<FetchedSize>, MeasureError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self
            .config
            .max_concurrency
            .unwrap_or(records.len())
            .min(records.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fetch-{}", i))
            .build()?;
        log::debug!("Fetching {} resources on {} workers", records.len(), workers);

        pool.install(|| {
            records
                .as_slice()
                .par_iter()
                .map(|record| self.fetch(record))
                .collect::<Result<Vec<_>, _>>()
        })
    }

    fn fetch(&self, record: &ResourceRecord) -> Result<FetchedSize, MeasureError> {
        let hint = if self.config.use_observed_encoding {
            record.content_encoding.clone()
        } else {
            None
        };

        ResourceFetcher::new(record.url.clone())
            .with_encoding_hint(hint)
            .with_options(self.config.fetch.clone())
            .run()
            .map_err(|source| MeasureError::Fetch {
                url: record.url.clone(),
                source,
            })
    }
}
