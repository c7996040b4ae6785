//! Persistent push connections: every event handed to the notification
//! callback is forwarded to connected clients.

pub mod broadcast;
pub mod connection;
pub mod handler;

pub use broadcast::BroadcastManager;
pub use connection::ClientConnection;
pub use handler::handle_socket;
