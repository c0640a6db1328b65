mod host_tests;
pub(crate) mod utils;
