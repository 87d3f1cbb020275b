//! Client-side messaging runtime for the hydrogen device-control
//! middleware: a single WebSocket connection, managed reconnection,
//! QoS-aware reliable delivery, property/event subscriptions, a local
//! device cache, and command execution.
//!
//! Built the way the teacher builds `ethers-providers`' WebSocket
//! transport: a background actor (here, [`connection::ConnectionManager`]
//! / [`connection::MessageProcessor`]) owns the live socket, and every
//! other component is a cheap, cloneable handle that talks to it over a
//! channel.

mod client;
mod command;
mod config;
mod connection;
mod device;
mod error;
mod queue;
mod subscription;

pub use client::DeviceClient;
pub use command::{AsyncCallback, CommandExecutor, CommandStatsSnapshot};
pub use config::ClientConfig;
pub use connection::{ConnectionCallback, ConnectionManager, ConnectionState, MessageProcessor};
pub use device::{DeviceManager, DeviceStats};
pub use error::{ApplicationError, ClientError, CorrelationError, ErrorHandler, SharedErrorHandler, TracingErrorHandler};
pub use queue::{AckCallback, QueueManager, QueueStats};
pub use subscription::{EventCallback, PropertyCallback, SubscriptionManager, SubscriptionStats};

pub use hydrogen_core::{
    AuthenticationMessage, CommandMessage, DiscoveryRequestMessage, DiscoveryResponseMessage,
    ErrorMessage, EventMessage, Message, MessageType, Payload, Priority, QosLevel,
    RegistrationMessage, ResponseMessage,
};
