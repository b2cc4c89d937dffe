//! Domain events and the mechanics around them.
//!
//! - [`DomainEvent`]: the fact being communicated, independent of wire format
//! - [`NativeRecord`]: the schema-agnostic field map a codec produces/consumes
//! - [`EventMapper`]: tolerant record → event mapping across schema versions
//! - [`EventSink`] / [`SinkFanout`]: downstream delivery
//! - [`EventPublisher`]: upstream publication seam used by business use cases

pub mod event;
pub mod mapper;
pub mod notification;
pub mod publisher;
pub mod record;
pub mod sink;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use event::DomainEvent;
pub use mapper::{EventMapper, FieldCandidates, MappingError};
pub use notification::NotificationService;
pub use publisher::{EventPublisher, publish_best_effort};
pub use record::{FieldValue, NativeRecord};
pub use sink::{EventSink, SinkError, SinkFanout};
