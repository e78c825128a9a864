//! HTTP control API
//!
//! Exposes the conversation controls the viewer UI consumes: start, stop,
//! toggle, and read-only views of the lifecycle state and transcript.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
