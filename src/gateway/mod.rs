//! WebSocket chat gateway.
//!
//! Authenticated clients join per-session rooms and exchange chat events.
//! The event names are a wire contract; see [`events`]. Rooms and fan-out
//! live in [`rooms`]; dispatch and socket plumbing in [`handler`].

mod events;
mod handler;
mod rooms;

pub use events::{ClientEvent, ServerEvent};
pub use handler::{ChatGateway, RoomDeliveryHandler};
pub use rooms::{session_room, Connection, RoomRegistry};
