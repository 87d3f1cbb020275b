//! Wire message model, error taxonomy, and identifier validation shared by
//! the `hydrogen-client` messaging runtime.
//!
//! This crate has no networking code — it exists so `hydrogen-client` (the
//! connection, processor, queue, subscription, device, and command layers)
//! and any server-side or alternative-transport implementation can agree on
//! exactly one definition of a message.

mod error;
mod message;
pub mod timestamp;
pub mod validate;

pub use error::Error;
pub use message::{
    AuthenticationMessage, CommandMessage, DiscoveryRequestMessage, DiscoveryResponseMessage,
    ErrorMessage, EventMessage, Message, MessageType, Payload, Priority, QosLevel,
    RegistrationMessage, ResponseMessage,
};

pub use uuid::Uuid;
