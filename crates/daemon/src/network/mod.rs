//! Network module exposing the hub to viewers.
//!
//! A single HTTP listener carries everything a viewer needs:
//! - `/ws`: the live channel (shell output, file notifications, shell input)
//! - `/files` and `/files/content`: listing and reading the watched root
//! - `/health`: liveness and viewer count

pub mod server;

pub use server::{bind, create_router, serve, AppState, ServerError};
