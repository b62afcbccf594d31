//! Page weight auditing.
//!
//! For every resource a page loads, compares the size the browser reported
//! while rendering with the bytes actually transferred (`encoded_size`) and
//! the bytes after content decoding (`actual_size`).

pub mod config;
pub mod engine;
pub mod net;
pub mod observe;

pub use config::{ContentTypeFilter, FetchOptions, MeasureConfig};
pub use engine::dedup::{ResourceDeduplicator, ResourceRecord, ResourceSet};
pub use engine::pipeline::{MeasureError, MeasurementPipeline};
pub use engine::report::{MeasurementResult, Report};
pub use net::counter::SizeCounter;
pub use net::fetch::{ContentCoding, FetchError, FetchedSize, ResourceFetcher};
pub use observe::{
    CollectorError, PhantomObserver, ReplayObserver, ResourceEvent, ResourceObserver,
};
