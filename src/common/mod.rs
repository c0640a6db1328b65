pub mod labels;
pub mod time;
pub mod types;
pub mod utils;

pub use labels::*;
pub use types::*;

pub static METRIC_NAME_LABEL: &str = "__name__";
