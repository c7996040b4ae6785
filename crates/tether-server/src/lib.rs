//! # tether-server
//!
//! HTTP + WebSocket surface of the backend process.
//!
//! - `GET /events/wait`: long-poll delivery with watermark and identity
//! - `GET /hooks/{pre,post}-compact`: context-reset instruction blocks
//! - `/agents`: background agent lifecycle
//! - `POST /tools/{name}`: tool calls relayed by the supervisor
//! - `GET /ws`: push of every event handed to the notification callback

#![deny(unsafe_code)]

pub mod delivery;
pub mod errors;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod websocket;

pub use errors::ServerError;
pub use server::{TetherServer, build_router};
pub use shutdown::ShutdownCoordinator;
pub use state::AppState;
