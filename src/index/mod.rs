mod filters;
mod index_key;
mod timeseries_index;


pub use filters::postings_for_matchers;
pub use timeseries_index::TimeSeriesIndex;
