// HTTP surface for the relay engine.

pub mod handler;

pub use handler::RelayServer;
