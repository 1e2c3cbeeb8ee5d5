pub(crate) mod http;
pub mod ndjson;
pub(crate) mod task;

#[doc(hidden)]
pub mod test_support;
