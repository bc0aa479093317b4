//! Domain events and their in-process delivery.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;

pub use bus::{HandlerFailure, Mediator, PublishError};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{EventHandler, HandlerError};
