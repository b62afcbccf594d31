//! Network side of the measurement: byte counting and resource fetching.

pub mod counter;
pub mod fetch;

#[cfg(test)]
pub(crate) mod test_server;
