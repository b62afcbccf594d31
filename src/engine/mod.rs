pub mod dedup;
pub mod pipeline;
pub mod report;
