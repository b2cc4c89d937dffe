//! `eventline-core`: shared building blocks for the event pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::EntityId;
