//! WebSocket sessions and wire protocol

pub mod handler;
pub mod hub;
pub mod protocol;

pub use hub::SessionHub;
