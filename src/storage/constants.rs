/// Samples per chunk before the open chunk is sealed. Matches the Prometheus head target.
pub const DEFAULT_CHUNK_SIZE: usize = 120;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;
