//! nodeflow HTTP server.
//!
//! Wires the engine to Postgres and exposes run triggering, single-node
//! test runs, execution lookup and a status event stream.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;

pub use config::ServerConfig;
pub use error::{ApiError, StartupError};
pub use routes::{AppState, router};
