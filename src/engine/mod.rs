// Engine core — session affinity, request dispatch and response decoding.

pub mod cache;
pub mod decoder;
pub mod dispatcher;
pub mod payload;
pub mod session;
pub mod stats;
