//! Broker protocol layer: wire frames and the WebSocket client.

pub mod client;
pub mod messages;

pub use client::{FrameListener, ProtocolClient};
pub use messages::{BuyRequest, ContractUpdate, Frame};
