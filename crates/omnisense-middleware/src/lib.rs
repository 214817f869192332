//! `omnisense-middleware` – fan-out of loop output and fan-in of operator
//! commands.
//!
//! # Modules
//!
//! - [`bus`] – [`EventBus`]: tokio broadcast channels split into
//!   [`Topic`] lanes, one per kind of traffic.  Publishing never blocks
//!   and never fails because nobody is listening.
//! - [`ws_bridge`] – [`WsBridge`][ws_bridge::WsBridge]: WebSocket server
//!   streaming bus events as JSON and forwarding inbound JSON commands to the
//!   fusion loop.

pub mod bus;
pub mod ws_bridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ws_bridge::{WsBridge, parse_command};
