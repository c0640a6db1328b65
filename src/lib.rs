pub mod common;
pub mod config;
pub mod error;
pub mod head;
pub mod host;
pub mod index;
pub mod pipeline;
pub mod promql;
pub mod querier;
pub mod storage;

#[cfg(test)]
mod tests;

pub use config::Settings;
pub use error::{TsdbError, TsdbResult};
pub use head::{Head, HeadOptions};
pub use pipeline::{EphemeralQuery, PipelineReport};
