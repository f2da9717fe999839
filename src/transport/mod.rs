//! Transport seam between the pairing engine and participant connections
//!
//! The engine only ever sees a [`ConnectionHandle`]. Commands arrive as
//! [`PoolCommand`]s and every outbound event is a [`Notification`].

pub mod handle;
pub mod messages;
pub mod stdio;

pub use handle::{ChannelHandle, ConnectionHandle};
pub use messages::{CommandMessage, InboundMessage, Notification, OutboundMessage, PoolCommand};
pub use stdio::{spawn_writer, LineRouter};
