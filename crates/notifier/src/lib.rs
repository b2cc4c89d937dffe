//! Notification service: consumes pipeline events and pushes them to
//! connected clients over Server-Sent Events.

pub mod app;
pub mod hub;

pub use hub::BroadcastHub;
