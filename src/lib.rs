pub mod api;
pub mod config;
pub mod credential;
pub mod detect;
pub mod engine;
pub mod error;
pub mod logging;
pub mod server;

pub use api::relay_api::{CompletionRequest, RelayEngine};
pub use config::EngineConfig;
pub use error::EngineError;
