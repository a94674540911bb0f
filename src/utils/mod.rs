pub mod logger;
pub mod request_id;
pub(crate) mod sync;
