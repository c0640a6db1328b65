mod constants;
mod slice;
pub mod time_series;
mod uncompressed_chunk;
pub(crate) mod utils;
pub mod wal;

pub use constants::*;
pub use slice::*;
pub use time_series::TimeSeries;
pub use uncompressed_chunk::UncompressedChunk;
pub use wal::{NoopWal, RefSample, WalRecord, WriteAheadLog};

/// Head-assigned series identifier. Only meaningful within the head that issued it.
pub type SeriesRef = u32;
